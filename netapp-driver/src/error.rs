use std::time::Duration;

use remote_client::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    /// Wrapper failure: exhausted connection retries, authorization, ...
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{0}")]
    NotFound(String),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{operation} did not finish within {waited:?}")]
    Timeout { operation: String, waited: Duration },

    #[error("API {api} failed: {reason}")]
    ApiFailed { api: String, reason: String },
}

impl DriverError {
    /// Short label used as the metrics status for a failed operation.
    pub fn code(&self) -> &'static str {
        match self {
            DriverError::Remote(RemoteError::ConnectionFailed { .. }) => "connection_failed",
            DriverError::Remote(RemoteError::NotAuthorized(_)) => "not_authorized",
            DriverError::Remote(_) => "remote_error",
            DriverError::NotFound(_) => "not_found",
            DriverError::Provisioning(_) => "provisioning_failed",
            DriverError::Configuration(_) => "configuration_error",
            DriverError::Timeout { .. } => "timeout",
            DriverError::ApiFailed { .. } => "api_failed",
        }
    }

    /// Whether the remote system reported the operation itself as failed.
    pub fn is_provisioning_failure(&self) -> bool {
        matches!(
            self,
            DriverError::Provisioning(_) | DriverError::ApiFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
