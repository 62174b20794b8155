//! Custom error types for the capture pipeline.
//!
//! This module defines the primary error type, `CaptureError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes of a sampling
//! session, from configuration problems to hardware-level capture failures.
//!
//! ## Error Classes
//!
//! - **`Config` / `Configuration`**: file/format errors from the `config`
//!   crate versus semantic errors caught during validation (e.g. a zero
//!   sample count for a finite run).
//! - **`Io`**: wraps `std::io::Error` for file and directory operations.
//! - **`OpenFailed`**: the device open permit could not be acquired within
//!   its bounded wait, or the device itself refused to open. Fatal to the
//!   session; never retried here.
//! - **`AccessDenied`**: the host denied access to the device. The open
//!   attempt is abandoned (logged, not retried).
//! - **`ControlUnsupported`**: a preview mode asked for a sensor control
//!   (manual exposure time / sensitivity) the device does not expose. Raised
//!   eagerly at the point of the mode change.
//! - **`SessionConfigFailed`**: the device rejected a capture-session
//!   request. Fatal to the running experiment.
//! - **`Storage`**: image persistence problems surfaced to callers that
//!   explicitly wait on the saver (writes themselves are fire-and-forget).
//!
//! By using `#[from]`, `CaptureError` can be seamlessly created from the
//! underlying error types, so `?` works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, CaptureError>;

/// Error type covering every failure class of the capture pipeline.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure while touching the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device could not be opened (permit timeout or hardware refusal).
    #[error("Camera open failed: {0}")]
    OpenFailed(String),

    /// The host denied access to the device.
    #[error("Camera access denied: {0}")]
    AccessDenied(String),

    /// A requested mode needs a sensor control the device lacks.
    #[error("Camera control not supported: {0}")]
    ControlUnsupported(String),

    /// The device rejected the capture-session configuration.
    #[error("Capture session configuration failed: {0}")]
    SessionConfigFailed(String),

    /// An operation was issued against a device that is not ready for it.
    #[error("Camera device not ready: {0}")]
    DeviceNotReady(String),

    /// Image persistence failure surfaced through an explicit wait.
    #[error("Storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::OpenFailed("camera open timed out".to_string());
        assert_eq!(err.to_string(), "Camera open failed: camera open timed out");
    }

    #[test]
    fn test_control_unsupported_display() {
        let err = CaptureError::ControlUnsupported("sensor exposure time".into());
        assert!(err.to_string().contains("sensor exposure time"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CaptureError = io.into();
        assert!(matches!(err, CaptureError::Io(_)));
    }
}
