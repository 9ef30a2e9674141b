//! Image service facade
//!
//! Every call goes through a `RemoteClient`, so connection failures fail over
//! across the configured registry endpoints. Outgoing records are encoded
//! with the metadata codec and incoming ones decoded and translated into
//! `ImageMeta`.

use std::sync::Arc;

use remote_client::{Connector, Endpoint, RemoteClient, RetryPolicy};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument};
use url::Url;

use crate::api::{ImageHandle, RawImage};
use crate::codec;
use crate::config::{DEFAULT_IMAGE_PORT, ImageServiceConfig};
use crate::error::{ImageError, Result};
use crate::types::{ImageMeta, ListParams, RequestContext};

/// Where an image reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Plain image id, served by the configured registry pool
    Local { image_id: String },
    /// `http(s)://host[:port]/.../<id>`, served by that one registry
    Remote { endpoint: Endpoint, image_id: String },
}

/// Split an image reference into its registry and image id.
pub fn parse_image_ref(href: &str) -> Result<ImageRef> {
    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Ok(ImageRef::Local {
                image_id: href.to_string(),
            });
        }
        Err(e) => {
            return Err(ImageError::Invalid(format!(
                "invalid image reference '{}': {}",
                href, e
            )));
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| ImageError::Invalid(format!("image reference '{}' has no host", href)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = url.port().unwrap_or(DEFAULT_IMAGE_PORT);

    let image_id = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .ok_or_else(|| {
            ImageError::Invalid(format!("image reference '{}' has no image id", href))
        })?;

    Ok(ImageRef::Remote {
        endpoint: Endpoint::new(host, port),
        image_id: image_id.to_string(),
    })
}

/// Image registry operations on behalf of a request context.
#[derive(Clone)]
pub struct ImageService {
    client: Arc<RemoteClient<ImageHandle>>,
    connector: Arc<dyn Connector<ImageHandle>>,
    policy: RetryPolicy,
}

impl ImageService {
    /// Service over the configured endpoint pool, shuffled for this instance.
    pub fn from_config(
        connector: Arc<dyn Connector<ImageHandle>>,
        config: &ImageServiceConfig,
    ) -> Result<Self> {
        let policy = config.retry_policy();
        let client = RemoteClient::from_pool(connector.clone(), &config.pool()?, policy)
            .map_err(|e| ImageError::from_remote(e, None))?;
        Ok(Self::new(Arc::new(client), connector))
    }

    /// Service over one fixed registry endpoint.
    pub fn fixed(
        connector: Arc<dyn Connector<ImageHandle>>,
        endpoint: Endpoint,
        policy: RetryPolicy,
    ) -> Self {
        let client = RemoteClient::fixed(connector.clone(), endpoint, policy);
        Self::new(Arc::new(client), connector)
    }

    pub fn new(
        client: Arc<RemoteClient<ImageHandle>>,
        connector: Arc<dyn Connector<ImageHandle>>,
    ) -> Self {
        let policy = client.policy();
        Self {
            client,
            connector,
            policy,
        }
    }

    pub fn client(&self) -> &RemoteClient<ImageHandle> {
        &self.client
    }

    /// Service and image id for an image reference.
    ///
    /// References naming a registry get a service bound to that registry
    /// alone; plain ids are served by this service.
    pub fn for_image_ref(&self, href: &str) -> Result<(ImageService, String)> {
        match parse_image_ref(href)? {
            ImageRef::Local { image_id } => Ok((self.clone(), image_id)),
            ImageRef::Remote { endpoint, image_id } => {
                debug!(endpoint = %endpoint, image_id = %image_id, "Using remote image service");
                let service = Self::fixed(self.connector.clone(), endpoint, self.policy);
                Ok((service, image_id))
            }
        }
    }

    /// Images visible to `ctx`, paginated by marker and limit.
    #[instrument(skip(self, ctx))]
    pub async fn detail(&self, ctx: &RequestContext, params: &ListParams) -> Result<Vec<ImageMeta>> {
        let marker = params.marker.as_deref();
        let limit = params.limit;
        let raw_images = self
            .client
            .call("get_images_detailed", |api| async move {
                api.get_images_detailed(marker, limit).await
            })
            .await
            .map_err(|e| ImageError::from_remote(e, marker))?;

        let mut images = Vec::with_capacity(raw_images.len());
        for raw in raw_images {
            let image = translate_from_registry(raw)?;
            if ctx.can_see(&image) {
                images.push(image);
            }
        }
        debug!(count = images.len(), "Listed images");
        Ok(images)
    }

    #[instrument(skip(self, ctx))]
    pub async fn show(&self, ctx: &RequestContext, image_id: &str) -> Result<ImageMeta> {
        let raw = self
            .client
            .call("get_image_meta", |api| async move {
                api.get_image_meta(image_id).await
            })
            .await
            .map_err(|e| ImageError::from_remote(e, Some(image_id)))?;

        let image = translate_from_registry(raw)?;
        if !ctx.can_see(&image) {
            return Err(ImageError::NotFound {
                image_id: image_id.to_string(),
            });
        }
        Ok(image)
    }

    /// Store a new image; returns the record as the registry saved it.
    #[instrument(skip(self, _ctx, meta, data), fields(name = ?meta.name))]
    pub async fn create(
        &self,
        _ctx: &RequestContext,
        meta: &ImageMeta,
        data: Option<Vec<u8>>,
    ) -> Result<ImageMeta> {
        let raw = translate_to_registry(meta)?;
        let saved = self
            .client
            .call("add_image", |api| {
                let raw = raw.clone();
                let data = data.clone();
                async move { api.add_image(raw, data).await }
            })
            .await
            .map_err(|e| ImageError::from_remote(e, None))?;

        let image = translate_from_registry(saved)?;
        info!(image_id = ?image.id, "Created image");
        Ok(image)
    }

    /// Replace an image's metadata (and optionally its data).
    #[instrument(skip(self, _ctx, meta, data))]
    pub async fn update(
        &self,
        _ctx: &RequestContext,
        image_id: &str,
        meta: &ImageMeta,
        data: Option<Vec<u8>>,
        purge_props: bool,
    ) -> Result<ImageMeta> {
        let mut raw = translate_to_registry(meta)?;
        // The id travels in the request path, never in the body
        raw.remove("id");

        let saved = self
            .client
            .call("update_image", |api| {
                let raw = raw.clone();
                let data = data.clone();
                async move { api.update_image(image_id, raw, data, purge_props).await }
            })
            .await
            .map_err(|e| ImageError::from_remote(e, Some(image_id)))?;

        translate_from_registry(saved)
    }

    #[instrument(skip(self, _ctx))]
    pub async fn delete(&self, _ctx: &RequestContext, image_id: &str) -> Result<()> {
        self.client
            .call("delete_image", |api| async move {
                api.delete_image(image_id).await
            })
            .await
            .map_err(|e| ImageError::from_remote(e, Some(image_id)))?;
        info!(image_id, "Deleted image");
        Ok(())
    }

    /// Write the image body to `writer`; returns the image metadata.
    #[instrument(skip(self, ctx, writer))]
    pub async fn download<W>(
        &self,
        ctx: &RequestContext,
        image_id: &str,
        writer: &mut W,
    ) -> Result<ImageMeta>
    where
        W: AsyncWrite + Unpin,
    {
        let (raw, chunks) = self
            .client
            .call("get_image", |api| async move { api.get_image(image_id).await })
            .await
            .map_err(|e| ImageError::from_remote(e, Some(image_id)))?;

        let image = translate_from_registry(raw)?;
        if !ctx.can_see(&image) {
            return Err(ImageError::NotFound {
                image_id: image_id.to_string(),
            });
        }

        for chunk in &chunks {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(image)
    }
}

fn translate_to_registry(meta: &ImageMeta) -> Result<RawImage> {
    Ok(codec::encode(&meta.to_raw()?))
}

fn translate_from_registry(raw: RawImage) -> Result<ImageMeta> {
    ImageMeta::from_raw(codec::decode(&raw))
}
