//! Error types for opening devices

use thiserror::Error;

/// Errors raised while opening a device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No backend with this name is compiled in
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// A `key=value` parameter could not be used
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A required parameter is missing
    #[error("Missing parameter '{0}'")]
    MissingParameter(&'static str),

    /// The requested model is not in the model catalog
    #[error("Model {0} is not in the model catalog")]
    UnknownModel(u32),

    /// Connection to a remote register bridge failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// I/O error while opening the device
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DeviceError> for cfaflash_core::Error {
    fn from(e: DeviceError) -> Self {
        log::error!("{}", e);
        cfaflash_core::Error::DeviceOpen
    }
}
