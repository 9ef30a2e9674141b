//! Image registry client configuration

use std::time::Duration;

use clap::Args;
use remote_client::{EndpointPool, RetryPolicy};

use crate::error::{ImageError, Result};

/// Default registry port when an image reference does not name one
pub const DEFAULT_IMAGE_PORT: u16 = 9292;

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ImageServiceConfig {
    /// Image API servers (host:port), tried in random order per client
    #[arg(
        long = "image-api-servers",
        env = "IMAGE_API_SERVERS",
        value_delimiter = ',',
        default_value = "localhost:9292"
    )]
    pub api_servers: Vec<String>,

    /// Retries after a connection failure (0 disables retrying)
    #[arg(long = "image-num-retries", env = "IMAGE_NUM_RETRIES", default_value_t = 0)]
    pub num_retries: u32,

    /// Delay before the first retry, in milliseconds (doubles per retry)
    #[arg(
        long = "image-retry-backoff-ms",
        env = "IMAGE_RETRY_BACKOFF_MS",
        default_value_t = 1000
    )]
    pub retry_backoff_ms: u64,
}

impl Default for ImageServiceConfig {
    fn default() -> Self {
        Self {
            api_servers: vec![format!("localhost:{}", DEFAULT_IMAGE_PORT)],
            num_retries: 0,
            retry_backoff_ms: 1000,
        }
    }
}

impl ImageServiceConfig {
    /// Parsed endpoint pool; fails if the list is empty or malformed.
    pub fn pool(&self) -> Result<EndpointPool> {
        let pool = EndpointPool::parse(&self.api_servers)
            .map_err(|e| ImageError::Configuration(e.to_string()))?;
        if pool.is_empty() {
            return Err(ImageError::Configuration(
                "image api servers not set".to_string(),
            ));
        }
        Ok(pool)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.num_retries).with_backoff(Duration::from_millis(self.retry_backoff_ms))
    }
}
