//! Serial port transport

use super::{Channel, FatalError, TransportSession};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io;
use std::time::Duration;

/// Serial port configuration
///
/// The sensor always speaks 8N1 without flow control; only the port,
/// baud rate and read timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            timeout_ms: 1000,
        }
    }

    /// Set read timeout
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Human-readable summary, e.g. `/dev/ttyUSB0 @ 4800 baud (8N1)`
    pub fn connection_info(&self) -> String {
        format!("{} @ {} baud (8N1)", self.port, self.baud_rate)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        let port = if cfg!(windows) { "COM3" } else { "/dev/ttyUSB0" };
        Self::new(port, 4800)
    }
}

/// Open and configure the serial port
///
/// Any failure here is fatal: without a channel no exchange can succeed.
pub fn open(
    config: &SerialConfig,
    turnaround: Duration,
) -> Result<TransportSession<Box<dyn SerialPort>>, FatalError> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(config.timeout_ms))
        .open()
        .map_err(|e| FatalError::ChannelUnavailable {
            port: config.port.clone(),
            reason: match e.kind() {
                serialport::ErrorKind::NoDevice
                | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    "no such device".to_string()
                }
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    "permission denied".to_string()
                }
                _ => e.to_string(),
            },
        })?;

    // Stale bytes from an earlier session would shift every response
    if let Err(e) = port.clear(ClearBuffer::All) {
        tracing::warn!(port = %config.port, error = %e, "Could not clear serial buffers");
    }

    tracing::info!("Connected to {}", config.connection_info());

    Ok(TransportSession::new(port).with_turnaround(turnaround))
}

impl Channel for dyn SerialPort {
    fn discard_input(&mut self) -> io::Result<usize> {
        let pending = self.bytes_to_read()?;
        self.clear(ClearBuffer::Input)?;
        Ok(usize::try_from(pending).unwrap_or(usize::MAX))
    }
}

/// List available serial ports
pub fn list_ports() -> serialport::Result<Vec<serialport::SerialPortInfo>> {
    serialport::available_ports()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_reference_deployment() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 4800);
        assert_eq!(config.timeout_ms, 1000);
    }

    #[test]
    fn test_connection_info() {
        let config = SerialConfig::new("/dev/ttyUSB1", 9600);
        assert_eq!(config.connection_info(), "/dev/ttyUSB1 @ 9600 baud (8N1)");
    }

    #[test]
    fn test_open_missing_port_is_fatal() {
        let config = SerialConfig::new("/dev/soilprobe-does-not-exist", 4800);
        let result = open(&config, Duration::ZERO);
        assert!(matches!(
            result,
            Err(FatalError::ChannelUnavailable { ref port, .. }) if port == "/dev/soilprobe-does-not-exist"
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SerialConfig = toml::from_str("port = \"COM7\"").unwrap();
        assert_eq!(config.port, "COM7");
        assert_eq!(config.baud_rate, 4800);
    }
}
