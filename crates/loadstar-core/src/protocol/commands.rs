//! Protocol commands
//!
//! ASCII command tokens understood by Loadstar Sensors interface boards.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Protocol commands for sensor communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Empty request: connectivity probe, also the stop token for continuous mode
    Ping,

    /// Single calibrated reading ('w')
    Weight,

    /// Raw ADC reading ('r')
    RawAdc,

    /// Start continuous streaming ('wc')
    StartStreaming,

    /// Model name ('model')
    Model,

    /// Device serial id ('id')
    Id,

    /// Native unit token ('unit')
    NativeUnit,

    /// Load capacity in native units ('lc')
    LoadCapacity,

    /// Zero the current reading ('tare')
    Tare,

    /// Averaging window in samples ('css')
    AveragingWindow,

    /// Averaging threshold ('cla')
    AveragingThreshold,

    /// Multi-line settings dump ('settings')
    Settings,
}

impl Command {
    /// Get the ASCII token sent on the wire
    pub fn token(&self) -> &'static str {
        match self {
            Command::Ping => "",
            Command::Weight => "w",
            Command::RawAdc => "r",
            Command::StartStreaming => "wc",
            Command::Model => "model",
            Command::Id => "id",
            Command::NativeUnit => "unit",
            Command::LoadCapacity => "lc",
            Command::Tare => "tare",
            Command::AveragingWindow => "css",
            Command::AveragingThreshold => "cla",
            Command::Settings => "settings",
        }
    }
}

/// A single request written to the wire, without terminator.
///
/// An empty request is a ping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    bytes: Bytes,
}

impl Request {
    /// Create a request from raw command bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The empty request
    pub fn ping() -> Self {
        Self::default()
    }

    /// A command followed by a single argument, e.g. `css 16`
    pub fn with_arg(command: impl AsRef<str>, arg: impl fmt::Display) -> Self {
        Self::from(format!("{} {}", command.as_ref(), arg))
    }

    /// Command bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check if this is a ping
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Command> for Request {
    fn from(cmd: Command) -> Self {
        Self::new(Bytes::from_static(cmd.token().as_bytes()))
    }
}

impl From<&'static str> for Request {
    fn from(s: &'static str) -> Self {
        Self::new(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Request {
    fn from(s: String) -> Self {
        Self::new(Bytes::from(s))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.bytes))
    }
}
