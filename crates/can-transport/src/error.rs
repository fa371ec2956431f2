use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// Failures raised by a [`crate::CanBus`] backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    /// No frame arrived within the receive window (milliseconds).
    #[error("no frame within {0} ms")]
    Timeout(u64),
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("bus is closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}
