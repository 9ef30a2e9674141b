//! Typed records exchanged with the DFM provisioning API
//!
//! The transport adapter builds these from the SOAP responses; nothing in
//! the driver looks at raw response objects.

use std::fmt;

/// Which enumeration an iteration handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterKind {
    Datasets,
    DatasetMembers,
    JobProgress,
    Luns,
    Hosts,
}

impl IterKind {
    /// Prefix of the `...IterStart` / `...IterNext` / `...IterEnd` API names
    pub fn api_prefix(&self) -> &'static str {
        match self {
            IterKind::Datasets => "DatasetListInfo",
            IterKind::DatasetMembers => "DatasetMemberListInfo",
            IterKind::JobProgress => "DpJobProgressEventList",
            IterKind::Luns => "LunListInfo",
            IterKind::Hosts => "HostListInfo",
        }
    }
}

/// Server-side iteration handle returned by an `...IterStart` call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IterTag {
    pub kind: IterKind,
    pub tag: String,
}

impl IterTag {
    pub fn new(kind: IterKind, tag: impl Into<String>) -> Self {
        Self {
            kind,
            tag: tag.into(),
        }
    }
}

impl fmt::Display for IterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.api_prefix(), self.tag)
    }
}

/// Dataset edit lock handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditLockId(pub u64);

impl fmt::Display for EditLockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataField {
    pub name: String,
    pub value: Option<String>,
}

impl MetadataField {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub dataset_id: String,
    pub dataset_name: String,
    pub metadata: Vec<MetadataField>,
}

impl DatasetInfo {
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.as_deref())
    }
}

/// Dataset member; `member_name` is the full LUN path `host:/volume/qtree/lun`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMemberInfo {
    pub member_id: String,
    pub member_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    JobStart,
    JobEnd,
    LunCreate,
    Other(String),
}

impl EventType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "job-start" => EventType::JobStart,
            "job-end" => EventType::JobEnd,
            "lun-create" => EventType::LunCreate,
            other => EventType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Normal,
    Warning,
    Error,
    Other(String),
}

impl EventStatus {
    pub fn from_name(name: &str) -> Self {
        match name {
            "normal" => EventStatus::Normal,
            "warning" => EventStatus::Warning,
            "error" => EventStatus::Error,
            other => EventStatus::Other(other.to_string()),
        }
    }
}

/// LUN created by a provisioning job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLunInfo {
    pub lun_name: String,
    pub lun_path_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub event_type: EventType,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub lun: Option<ProgressLunInfo>,
}

impl ProgressEvent {
    pub fn new(event_type: EventType, status: EventStatus) -> Self {
        Self {
            event_type,
            status,
            error_message: None,
            lun: None,
        }
    }
}

/// LUN details; `lun_path` is the partial path `volume/qtree/lun`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunInfo {
    pub lun_path: String,
    pub host_id: String,
    pub volume_name: String,
    pub qtree_name: String,
}

impl LunInfo {
    /// Last path component
    pub fn lun_name(&self) -> &str {
        self.lun_path.rsplit('/').next().unwrap_or(&self.lun_path)
    }

    /// `/vol/<volume>/<qtree>`
    pub fn qtree_path(&self) -> String {
        format!("/vol/{}/{}", self.volume_name, self.qtree_name)
    }
}

/// A storage system known to DFM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub host_id: String,
    pub host_name: String,
    pub host_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTimestamp {
    pub monitor_name: String,
    /// Seconds since the epoch; `None` until the monitor has run
    pub last_monitoring_timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionMemberRequest {
    pub name: String,
    pub description: Option<String>,
    pub size: u64,
    pub maximum_snapshot_space: u64,
}

/// Storage set of a newly provisioned dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSetDetails {
    pub dp_node_name: String,
    pub export_protocol: String,
    pub igroup_os_type: String,
    pub server_name_or_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetProvisionRequest {
    pub storage_service: String,
    pub dataset_name: String,
    pub assume_confirmation: bool,
    pub storage_set: StorageSetDetails,
    pub metadata: Vec<MetadataField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutInfo {
    pub version: String,
}
