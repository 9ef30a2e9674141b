//! Image registry client seam
//!
//! The registry speaks in flat property mappings: scalar fields plus a
//! `properties` object whose values the registry stores as strings. The
//! transport implementing `ImageApi` turns those into requests; everything
//! above it works on `RawImage` values.

use std::sync::Arc;

use async_trait::async_trait;
use remote_client::Result;
use serde_json::{Map, Value};

/// Image record as exchanged with the registry
pub type RawImage = Map<String, Value>;

/// Shared handle to a connected registry client
pub type ImageHandle = Arc<dyn ImageApi>;

/// Operations offered by the registry client.
///
/// Connection-level failures must be reported as
/// `RemoteError::Connection` so the wrapper can fail over; a missing image as
/// `NotFound`, missing or rejected credentials as `NotAuthorized`, and a bad
/// marker or other rejected argument as `Invalid`.
#[async_trait]
pub trait ImageApi: Send + Sync {
    /// Images after `marker` (exclusive), at most `limit` of them.
    async fn get_images_detailed(
        &self,
        marker: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<RawImage>>;

    async fn get_image_meta(&self, image_id: &str) -> Result<RawImage>;

    /// Metadata plus the image body in chunks.
    async fn get_image(&self, image_id: &str) -> Result<(RawImage, Vec<Vec<u8>>)>;

    async fn add_image(&self, meta: RawImage, data: Option<Vec<u8>>) -> Result<RawImage>;

    async fn update_image(
        &self,
        image_id: &str,
        meta: RawImage,
        data: Option<Vec<u8>>,
        purge_props: bool,
    ) -> Result<RawImage>;

    async fn delete_image(&self, image_id: &str) -> Result<()>;
}
