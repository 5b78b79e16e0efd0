//! Protocol errors

use std::io;

use thiserror::Error;

/// Errors that can occur while talking to a sensor
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The byte channel is gone (peer hung up, port unplugged, or closed locally)
    #[error("Channel closed")]
    ChannelClosed,

    /// No data before the deadline. Reads report this as an empty frame instead.
    #[error("Timed out waiting for response")]
    Timeout,

    #[error("No device answered on {port} after {attempts} probes")]
    DeviceNotFound { port: String, attempts: u32 },

    #[error("Handshake failed after {attempts} probes, last response '{last_response}'")]
    HandshakeFailed { attempts: u32, last_response: String },

    #[error("Response is not numeric: '{0}'")]
    NotNumeric(String),

    #[error("Cannot convert from '{from}' to '{to}'")]
    IncompatibleUnits { from: String, to: String },

    /// The wire is occupied by a continuous acquisition session
    #[error("Channel is streaming; stop acquisition first")]
    Streaming,

    #[error("Acquisition task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid response from sensor: {0}")]
    InvalidResponse(String),

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ProtocolError {
    /// Map an I/O error, folding hang-up style failures into [`ProtocolError::ChannelClosed`]
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => ProtocolError::ChannelClosed,
            _ => ProtocolError::IoError(err),
        }
    }

    /// Whether the error ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ChannelClosed
                | ProtocolError::DeviceNotFound { .. }
                | ProtocolError::HandshakeFailed { .. }
                | ProtocolError::SerialError(_)
        )
    }
}
