use thiserror::Error;

/// Failure reported by a remote transport or by the retry wrapper.
///
/// Transports report a single failed exchange as `Connection`; the wrapper
/// turns the last of those into `ConnectionFailed` once its retry budget is
/// spent. Every other variant is final and is never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection to {endpoint} failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("remote fault: {0}")]
    Fault(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RemoteError {
    /// Whether this failure happened at the connection level and may succeed
    /// against the same or another endpoint.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, RemoteError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
