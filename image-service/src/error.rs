use remote_client::RemoteError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("connection to image service at {endpoint} failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("not authorized for image {image_id}")]
    NotAuthorized { image_id: String },

    #[error("image {image_id} could not be found")]
    NotFound { image_id: String },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("malformed image record: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("image service error: {0}")]
    Remote(RemoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImageError {
    /// Map a wrapper failure onto the image error kinds, naming the image
    /// involved when there is one.
    pub fn from_remote(err: RemoteError, image_id: Option<&str>) -> Self {
        let image_id = image_id.unwrap_or("<none>").to_string();
        match err {
            RemoteError::ConnectionFailed {
                endpoint,
                attempts,
                reason,
            } => ImageError::ConnectionFailed {
                endpoint,
                attempts,
                reason,
            },
            RemoteError::NotAuthorized(_) => ImageError::NotAuthorized { image_id },
            RemoteError::NotFound(_) => ImageError::NotFound { image_id },
            RemoteError::Invalid(msg) => ImageError::Invalid(msg),
            RemoteError::Configuration(msg) => ImageError::Configuration(msg),
            other => ImageError::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
