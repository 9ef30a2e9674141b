//! Typed image records and the caller context used for visibility checks.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::RawImage;
use crate::error::{ImageError, Result};

/// Timestamp layout written back to the registry
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Parse a registry timestamp, with or without fractional seconds.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| ImageError::Malformed(format!("invalid timestamp '{}': {}", value, e)))
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{TIMESTAMP_FORMAT, parse_timestamp};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| parse_timestamp(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Image metadata with the fixed key set the rest of the system relies on.
///
/// Keys the registry returns beyond these are dropped on translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_disk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ram: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ImageMeta {
    /// Image with only a name set
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Translate a (decoded) registry record.
    pub fn from_raw(raw: RawImage) -> Result<Self> {
        serde_json::from_value(Value::Object(raw))
            .map_err(|e| ImageError::Malformed(e.to_string()))
    }

    /// Registry record for this image, before encoding.
    pub fn to_raw(&self) -> Result<RawImage> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ImageError::Malformed(format!(
                "image serialized to non-object value: {}",
                other
            ))),
            Err(e) => Err(ImageError::Malformed(e.to_string())),
        }
    }

    fn property_str(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Identity of the caller an image operation runs on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub auth_token: Option<String>,
    pub is_admin: bool,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Whether this caller may see `image`.
    ///
    /// A caller with an auth token is trusted to the registry's own checks.
    /// Otherwise the image must be public, the caller an admin, or the image
    /// tied to the caller through its `owner_id`/`project_id` property, or
    /// failing those its `user_id` property.
    pub fn can_see(&self, image: &ImageMeta) -> bool {
        if self.auth_token.is_some() {
            return true;
        }
        if image.is_public == Some(true) || self.is_admin {
            return true;
        }

        if let Some(project) = &self.project_id {
            for key in ["owner_id", "project_id"] {
                if let Some(owner) = image.property_str(key) {
                    return &owner == project;
                }
            }
        }

        match (image.property_str("user_id"), &self.user_id) {
            (Some(owner), Some(user)) => &owner == user,
            _ => false,
        }
    }
}

/// Pagination for image listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    pub fn after(marker: impl Into<String>) -> Self {
        Self {
            marker: Some(marker.into()),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
