//! # Error Types Module
//!
//! Centralized error handling for the monitor.
//!
//! ## Error Types
//! - `ScanError`: Bluetooth discovery failures (routed to Backoff)
//! - `ConnectError`: connect/subscribe failures (routed to Backoff)
//! - `FrameParseError`: malformed notification payloads (logged and dropped)
//! - `ExportError`: sample log export failures (surfaced as a status message)
//! - `ConfigError`: configuration file I/O and parsing errors
//!
//! None of these stop the acquisition loop. An empty scan and a dropped link
//! are not errors at all; the supervisor models them as backoff reasons.

use std::fmt;

/// Discovery failures. Unlike an empty scan these mean the radio itself
/// could not be used; the supervisor still retries them.
#[derive(Debug, Clone)]
pub enum ScanError {
    /// btleplug manager or adapter list unavailable
    ManagerInit(String),
    /// Host has no Bluetooth radio
    NoAdapters,
    /// Starting, stopping or reading the scan failed
    ScanFailed(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ManagerInit(msg) => write!(f, "Bluetooth unavailable: {}", msg),
            ScanError::NoAdapters => write!(f, "No Bluetooth adapter present"),
            ScanError::ScanFailed(msg) => write!(f, "Scan failed: {}", msg),
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors that can occur while opening or subscribing to a device
#[derive(Debug, Clone)]
pub enum ConnectError {
    /// Address no longer present in the adapter's peripheral list
    NotFound(String),
    /// Failed to connect to specific device
    DeviceConnection { address: String, reason: String },
    /// Connected, but the notification characteristic could not be used
    Subscribe { characteristic: String, reason: String },
    /// Connection attempt did not finish in time
    Timeout(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::NotFound(address) => {
                write!(f, "Device {} is no longer visible", address)
            }
            ConnectError::DeviceConnection { address, reason } => {
                write!(f, "Failed to connect to device {}: {}", address, reason)
            }
            ConnectError::Subscribe { characteristic, reason } => {
                write!(f, "Failed to subscribe to {}: {}", characteristic, reason)
            }
            ConnectError::Timeout(address) => {
                write!(f, "Timed out connecting to {}", address)
            }
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors produced while decoding a notification payload
#[derive(Debug, Clone, PartialEq)]
pub enum FrameParseError {
    /// Payload shorter than the encoding requires
    TooShort { expected: usize, actual: usize },
    /// Notification from a characteristic the configured layout does not use
    UnknownCharacteristic(String),
}

impl fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameParseError::TooShort { expected, actual } => {
                write!(f, "Frame too short: expected at least {} bytes, got {}", expected, actual)
            }
            FrameParseError::UnknownCharacteristic(uuid) => {
                write!(f, "Frame from unexpected characteristic {}", uuid)
            }
        }
    }
}

impl std::error::Error for FrameParseError {}

/// Errors that can occur while exporting the sample log
#[derive(Debug)]
pub enum ExportError {
    /// Destination could not be created or written
    Io(std::io::Error),
    /// CSV encoding or flushing failed
    Csv(csv::Error),
    /// No export directory configured or resolvable
    NoDestination,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "Failed to write export: {}", e),
            ExportError::Csv(e) => write!(f, "Failed to encode export: {}", e),
            ExportError::NoDestination => write!(f, "No export location available"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::Csv(e) => Some(e),
            ExportError::NoDestination => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<csv::Error> for ExportError {
    fn from(e: csv::Error) -> Self {
        ExportError::Csv(e)
    }
}

/// Problems reading or writing `config.toml`
#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Write(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(e) => write!(f, "Could not read monitor config: {}", e),
            ConfigError::Write(e) => write!(f, "Could not write monitor config: {}", e),
            ConfigError::Parse(e) => write!(f, "Invalid monitor config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Could not encode monitor config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(e) | ConfigError::Write(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Serialize(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_scan_error_display() {
        assert_eq!(ScanError::NoAdapters.to_string(), "No Bluetooth adapter present");
    }

    #[test]
    fn test_parse_error_reports_lengths() {
        let err = FrameParseError::TooShort { expected: 8, actual: 3 };
        let msg = err.to_string();
        assert!(msg.contains('8'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_export_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = ExportError::from(io_err);
        assert!(err.source().is_some());
        assert!(ExportError::NoDestination.source().is_none());
    }

    #[test]
    fn test_config_error_chain() {
        let err = ConfigError::Read(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("Could not read"));
    }
}
