//! Error types for Tessel.

use thiserror::Error;

/// Main error type for Tessel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TesselError {
    #[error("GPU error: {0}")]
    Gpu(String),

    /// The backend reported an unrecoverable device failure.
    #[error("GPU device lost")]
    DeviceLost,

    /// The object was produced for a different device connection.
    #[error("Foreign device: {0}")]
    ForeignDevice(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Readback failed: {0}")]
    Readback(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TesselError {
    /// Whether this error means the device can no longer be used.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}

/// Result type alias for Tessel operations.
pub type Result<T> = std::result::Result<T, TesselError>;
