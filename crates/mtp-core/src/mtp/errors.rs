//! Error types for MTP session and object operations.

use super::transport::TransportCode;
use super::types::ObjectId;

/// Error types for MTP session and object operations.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MtpError {
    /// The registry was used before `initialize()` (or after `shutdown()`).
    NotInitialized,
    /// Enumeration found nothing attached.
    NoDeviceFound,
    /// The transport could not connect to any device.
    ConnectionError,
    /// The transport ran out of memory while enumerating.
    AllocationError,
    /// Enumeration failed with a code we have no specific mapping for.
    TransportUnknown { code: i32 },
    /// Object lookup failed. `message` is the device's text or a generic fallback.
    ObjectNotFound { object_id: ObjectId, message: String },
    /// A session-scoped command failed. `message` is the device's text or a generic fallback.
    OperationFailed { message: String },
    /// Index past the end of a device or storage list.
    InvalidIndex { index: usize, len: usize },
    /// The owning session was released; the handle that produced this is dead.
    StaleHandle,
    /// A path component didn't resolve to an object.
    PathNotFound { path: String },
}

impl MtpError {
    /// Maps an enumeration status code to the cause it stands for.
    pub fn from_enumeration_code(code: TransportCode) -> Self {
        match code {
            TransportCode::NO_DEVICE_ATTACHED => Self::NoDeviceFound,
            TransportCode::CONNECTING => Self::ConnectionError,
            TransportCode::MEMORY_ALLOCATION => Self::AllocationError,
            other => Self::TransportUnknown { code: other.0 },
        }
    }

    /// Returns true if the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionError | Self::AllocationError)
    }

    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInitialized => "Device support isn't started yet.".to_string(),
            Self::NoDeviceFound => {
                "No device found. Connect it via USB and choose \"File transfer\" mode.".to_string()
            }
            Self::ConnectionError => "Couldn't connect to the device. Unplug it and try again.".to_string(),
            Self::AllocationError => "Ran out of memory talking to the device. Try again.".to_string(),
            Self::TransportUnknown { code } => format!("The device reported an unknown error (code {}).", code),
            Self::ObjectNotFound { .. } => "File or folder not found. It may have been deleted.".to_string(),
            Self::OperationFailed { message } => format!("Device reported an error: {}", message),
            Self::InvalidIndex { .. } => "That device or storage is no longer available.".to_string(),
            Self::StaleHandle => "Device was disconnected. Reconnect it to continue.".to_string(),
            Self::PathNotFound { path } => format!("{} was not found on the device.", path),
        }
    }
}

impl std::fmt::Display for MtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "MTP library not initialized"),
            Self::NoDeviceFound => write!(f, "No devices found"),
            Self::ConnectionError => write!(f, "Error connecting to device"),
            Self::AllocationError => write!(f, "Memory allocation error"),
            Self::TransportUnknown { code } => write!(f, "Unknown error: {code}"),
            Self::ObjectNotFound { message, .. } => write!(f, "{message}"),
            Self::OperationFailed { message } => write!(f, "{message}"),
            Self::InvalidIndex { index, len } => {
                write!(f, "Index {index} out of range ({len} available)")
            }
            Self::StaleHandle => write!(f, "Device session has been released"),
            Self::PathNotFound { path } => write!(f, "Path not found: {path}"),
        }
    }
}

impl std::error::Error for MtpError {}
