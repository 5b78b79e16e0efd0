//! Serial port handling
//!
//! Opens the USB-serial device node for callers that do not bring their own
//! stream. The rest of the crate only needs something readable and writable.

use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use super::{ConnectionConfig, ProtocolError};

/// Open and configure the port named in `config` (8N1, no flow control)
pub fn open_port(config: &ConnectionConfig) -> Result<SerialStream, ProtocolError> {
    if config.port_name.is_empty() {
        return Err(ProtocolError::Config("no port name given".to_string()));
    }

    let mut port = tokio_serial::new(&config.port_name, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(config.timeout())
        .open_native_async()
        .map_err(|e| ProtocolError::SerialError(format!("{}: {}", config.port_name, e)))?;

    // Drop whatever the OS buffered before we got here
    clear_buffers(&mut port)?;

    tracing::debug!(
        port = %config.port_name,
        baud = config.baud_rate,
        "serial port open"
    );
    Ok(port)
}

/// Clear the OS-level input and output buffers
pub fn clear_buffers(port: &mut SerialStream) -> Result<(), ProtocolError> {
    port.clear(ClearBuffer::All)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_port_requires_name() {
        let config = ConnectionConfig::default();
        assert!(matches!(open_port(&config), Err(ProtocolError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let config = ConnectionConfig::for_port("/dev/loadstar-does-not-exist");
        assert!(matches!(
            open_port(&config),
            Err(ProtocolError::SerialError(_))
        ));
    }
}
