//! Serial Protocol Communication
//!
//! Implements the Loadstar Sensors line protocol: CR-terminated ASCII
//! requests, line-terminated ASCII responses, one exchange on the wire at a
//! time.

pub mod channel;
pub mod codec;
pub mod commands;
mod connection;
mod error;
pub mod firmware;
pub mod handshake;
pub mod serial;

pub use channel::{ByteChannel, FramedChannel};
pub use codec::{Frame, FrameCodec, ResponseTerminator};
pub use commands::{Command, Request};
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::ProtocolError;
pub use firmware::FirmwareProfile;
pub use handshake::{HandshakeConfig, HandshakeReport, HandshakeState};
pub use serial::open_port;

/// Default baud rate for the USB interface boards
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default timeout for a single response read in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 50;

/// Default number of attempts for single-shot requests
pub const DEFAULT_READ_ATTEMPTS: u32 = 100;

/// Default delay between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10;

/// Maximum length of an unterminated response line
pub const MAX_FRAME_SIZE: usize = 4096;
