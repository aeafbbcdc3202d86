//! Error types surfaced by the heart-rate bridge

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Machine-readable error code carried by every [`HrmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    BluetoothOff,
    DeviceNotFound,
    SubscribeFailed,
    Disconnected,
    ScanFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::BluetoothOff => "BLUETOOTH_OFF",
            ErrorCode::DeviceNotFound => "DEVICE_NOT_FOUND",
            ErrorCode::SubscribeFailed => "SUBSCRIBE_FAILED",
            ErrorCode::Disconnected => "DISCONNECTED",
            ErrorCode::ScanFailed => "SCAN_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by scan, connect and disconnect
#[derive(Debug, Clone, Error)]
pub enum HrmError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Bluetooth unavailable: {0}")]
    BluetoothOff(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to subscribe to heart rate notifications: {0}")]
    SubscribeFailed(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Scan failed with platform code {code}: {message}")]
    ScanFailed { code: i32, message: String },
}

impl HrmError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HrmError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            HrmError::BluetoothOff(_) => ErrorCode::BluetoothOff,
            HrmError::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
            HrmError::SubscribeFailed(_) => ErrorCode::SubscribeFailed,
            HrmError::Disconnected(_) => ErrorCode::Disconnected,
            HrmError::ScanFailed { .. } => ErrorCode::ScanFailed,
        }
    }
}
