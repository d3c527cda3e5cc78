//! Error types for the link layer.
//!
//! `TransportError` is what a platform backend reports. The negotiator and
//! the session convert it into `LinkError` at their boundary; nothing below
//! them leaks out.

use thiserror::Error;

/// Failure reported by a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Platform(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("socket is not connected")]
    NotConnected,

    #[error("connect timeout after {0} ms")]
    Timeout(u64),

    #[error("permission denied")]
    PermissionDenied,
}

/// Errors surfaced by the link layer.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] TransportError),

    #[error("connected but no outbound stream is available")]
    StreamUnavailable,

    #[error("send failed after {attempts} attempts: {source}")]
    SendFailed {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("error while closing: {0}")]
    CloseError(#[source] TransportError),

    #[error("not connected to device")]
    NotConnected,
}

/// User-facing category for a failed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Unreachable,
    Refused,
    OutOfRange,
    Generic,
}

impl FailureCategory {
    /// Best-effort classification of an error text. May misclassify.
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("service discovery failed") {
            Self::Unreachable
        } else if text.contains("connection refused") {
            Self::Refused
        } else if text.contains("timeout") || text.contains("timed out") {
            Self::OutOfRange
        } else {
            Self::Generic
        }
    }

    pub fn user_message(self, device_name: &str) -> String {
        match self {
            Self::Unreachable => format!(
                "Device not found. Make sure {device_name} is powered on and in range."
            ),
            Self::Refused => format!(
                "Connection refused by {device_name}. Try unpairing and re-pairing the device."
            ),
            Self::OutOfRange => format!(
                "Connection timeout to {device_name}. Move closer to the device and try again."
            ),
            Self::Generic => format!(
                "Failed to connect to {device_name}. Ensure it's powered on, unpaired from other devices, and try again."
            ),
        }
    }
}

impl LinkError {
    /// Message for the event sink when connecting to `device_name` failed.
    pub fn connect_message(&self, device_name: &str) -> String {
        match self {
            Self::ConnectionFailed(last) => {
                FailureCategory::classify(&last.to_string()).user_message(device_name)
            }
            Self::PermissionDenied => self.to_string(),
            other => FailureCategory::classify(&other.to_string()).user_message(device_name),
        }
    }
}
