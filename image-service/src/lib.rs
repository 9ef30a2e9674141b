//! Image registry integration
//!
//! Talks to the image registry through the failover wrapper from
//! `remote_client`, storing structured image properties in the registry's
//! flat key-value property store.
//!
//! - `api`: the registry client seam implemented by the transport
//! - `codec`: flattening of nested image properties
//! - `config`: endpoint and retry configuration
//! - `service`: the `ImageService` facade
//! - `types`: typed image records and request context

pub mod api;
pub mod codec;
pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use api::{ImageApi, ImageHandle, RawImage};
pub use config::ImageServiceConfig;
pub use error::{ImageError, Result};
pub use service::{ImageRef, ImageService, parse_image_ref};
pub use types::{ImageMeta, ListParams, RequestContext};
