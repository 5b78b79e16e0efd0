//! # Loadstar Core Library
//!
//! Serial transaction engine for Loadstar Sensors load-cell interface boards.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Line framing over any async duplex byte stream
//! - Serialized request/response transactions
//! - Handshake and resynchronization after boot chatter
//! - Continuous acquisition with a background reader
//! - Numeric parsing, scaling and unit conversion
//!
//! ## Supported boards
//!
//! - DI-100U / DI-1000U USB interfaces (legacy firmware, CR+LF responses)
//! - Current firmware generation (LF responses, `Tared` acknowledgement)
//!
//! ## Example
//!
//! ```rust,ignore
//! use loadstar_core::prelude::*;
//!
//! let config = ConnectionConfig::for_port("/dev/ttyUSB0");
//! let port = open_port(&config)?;
//! let sensor = LoadstarSensor::connect(port, config).await?;
//!
//! sensor.set_output_unit("lb", "kg")?;
//! if let Some(sample) = sensor.sensor_value().await? {
//!     println!("load: {sample}");
//! }
//! ```

pub mod acquisition;
pub mod protocol;
pub mod sensor;
pub mod units;
pub mod values;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acquisition::AcquisitionStats;
    pub use crate::protocol::{
        open_port, Connection, ConnectionConfig, ConnectionState, FirmwareProfile, Frame,
        ProtocolError,
    };
    pub use crate::sensor::{DeviceInfo, LoadstarSensor};
    pub use crate::units::Unit;
    pub use crate::values::{Calibration, Sample, ScaleFactor, ValueCodec};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
