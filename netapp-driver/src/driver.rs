//! NetApp iSCSI volume driver (7-mode, through OnCommand DFM)
//!
//! Volumes are LUNs provisioned into per-project datasets. Snapshots are
//! single-file LUN clones in the qtree of their volume; a volume created
//! from a snapshot is a clone into a qtree of its own.

use std::str::FromStr;
use std::sync::Arc;

use remote_client::Connector;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::DfmConfig;
use crate::dfm::{Dfm, DfmHandle, LunInfo};
use crate::discovery::{DiscoveryCache, DiscoverySummary, Lun, LunScope};
use crate::error::{DriverError, Result};
use crate::filer::{Filer, VolumeResize};
use crate::jobs::JobMonitor;
use crate::mapping::InitiatorMapper;
use crate::metrics::OperationTimer;
use crate::provision::{LunRequest, Provisioner, StorageServices, describe, volume_size_bytes};

/// Volume fields the driver reads and writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRecord {
    pub id: String,
    pub name: String,
    pub project_id: String,
    /// Size in gigabytes; 0 requests the default size
    pub size_gb: u64,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
    /// Volume type name
    pub storage_class: Option<String>,
    /// Remote LUN id, set by `create_export`
    pub provider_location: Option<String>,
    /// `method username secret`
    pub provider_auth: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub name: String,
    pub volume_name: String,
    pub project_id: String,
    pub volume_size_gb: u64,
}

/// The host a volume is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConnector {
    pub initiator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportInfo {
    pub provider_location: String,
}

/// CHAP credentials stored with a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderAuth {
    pub auth_method: String,
    pub auth_username: String,
    pub auth_password: String,
}

impl FromStr for ProviderAuth {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [method, username, secret] => Ok(Self {
                auth_method: method.to_string(),
                auth_username: username.to_string(),
                auth_password: secret.to_string(),
            }),
            _ => Err(DriverError::Configuration(format!(
                "provider_auth must be 'method username secret', got {} field(s)",
                parts.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IscsiProperties {
    pub target_discovered: bool,
    pub target_portal: String,
    pub target_iqn: String,
    pub target_lun: u32,
    pub volume_id: String,
    #[serde(flatten)]
    pub auth: Option<ProviderAuth>,
}

/// What an initiator needs to log in to the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub driver_volume_type: String,
    pub data: IscsiProperties,
}

impl ConnectionInfo {
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| DriverError::Provisioning(format!("failed to encode connection info: {}", e)))
    }
}

#[derive(Debug)]
pub struct NetAppIscsiDriver {
    dfm: Dfm,
    cache: Arc<DiscoveryCache>,
    jobs: JobMonitor,
    provisioner: Provisioner,
    mapper: InitiatorMapper,
}

impl NetAppIscsiDriver {
    /// Validate the configuration and bind to the DFM server. No remote
    /// call is made until `check_for_setup_error`.
    pub fn new(config: &DfmConfig, connector: Arc<dyn Connector<DfmHandle>>) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        info!(
            dfm = %DfmConfig::soap_url(&endpoint),
            storage_service = ?config.storage_service,
            storage_service_prefix = ?config.storage_service_prefix,
            vfiler = ?config.vfiler,
            "Using DFM server"
        );

        let dfm = Dfm::fixed(connector, endpoint, config.retry_policy());
        let cache = Arc::new(DiscoveryCache::new());
        let jobs = JobMonitor::new(dfm.clone(), config.poll_settings());
        let provisioner = Provisioner::new(
            dfm.clone(),
            cache.clone(),
            jobs.clone(),
            StorageServices::from_config(config),
        );
        let mapper = InitiatorMapper::new(dfm.clone());
        Ok(Self {
            dfm,
            cache,
            jobs,
            provisioner,
            mapper,
        })
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    pub fn dfm(&self) -> &Dfm {
        &self.dfm
    }

    /// Check the server answers, then run a full discovery pass.
    #[instrument(skip(self))]
    pub async fn check_for_setup_error(&self) -> Result<DiscoverySummary> {
        let about = self.dfm.about().await?;
        debug!(version = %about.version, "Connected to DFM server");
        self.cache.discover(&self.dfm).await
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn create_volume(&self, volume: &VolumeRecord) -> Result<Lun> {
        let timer = OperationTimer::new("create_volume");
        let request = LunRequest {
            name: volume.name.clone(),
            description: describe(
                volume.display_name.as_deref(),
                volume.display_description.as_deref(),
            ),
            project: volume.project_id.clone(),
            storage_class: volume.storage_class.clone(),
            size: volume_size_bytes(volume.size_gb),
        };
        timer.finish(self.provisioner.provision(&request).await)
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn delete_volume(&self, volume: &VolumeRecord) -> Result<()> {
        let timer = OperationTimer::new("delete_volume");
        timer.finish(
            self.provisioner
                .remove_and_destroy(&volume.name, &volume.project_id)
                .await,
        )
    }

    /// Export info for a new volume: the LUN id.
    pub async fn create_export(&self, volume: &VolumeRecord) -> Result<ExportInfo> {
        self.export(volume).await
    }

    /// Export info for an existing volume: the LUN id.
    pub async fn ensure_export(&self, volume: &VolumeRecord) -> Result<ExportInfo> {
        self.export(volume).await
    }

    /// Exports are derived from the LUN, so there is nothing to remove.
    pub async fn remove_export(&self, _volume: &VolumeRecord) -> Result<()> {
        Ok(())
    }

    async fn export(&self, volume: &VolumeRecord) -> Result<ExportInfo> {
        let lun = self
            .cache
            .lookup(&volume.name, &LunScope::project(&volume.project_id))
            .await?;
        Ok(ExportInfo {
            provider_location: lun.id,
        })
    }

    /// Mask the LUN to the host's initiator and return the iSCSI
    /// properties the host logs in with.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn initialize_connection(
        &self,
        volume: &VolumeRecord,
        connector: &HostConnector,
    ) -> Result<ConnectionInfo> {
        let timer = OperationTimer::new("initialize_connection");
        timer.finish(self.connect(volume, connector).await)
    }

    async fn connect(&self, volume: &VolumeRecord, connector: &HostConnector) -> Result<ConnectionInfo> {
        let lun = self.lun_details_for(volume).await?;
        let target_lun = self
            .mapper
            .ensure_mapped(&lun.host_id, &lun.lun_path, &connector.initiator)
            .await?;

        let host = self.dfm.host_details(&lun.host_id).await?;
        let filer = Filer::new(&self.dfm, &host.host_id);
        let portal = filer
            .target_portal(&host.host_address)
            .await?
            .ok_or_else(|| {
                DriverError::Provisioning(format!(
                    "Failed to get target portal for filer: {}",
                    host.host_name
                ))
            })?;
        let iqn = filer.iscsi_node_name().await?;
        if iqn.is_empty() {
            return Err(DriverError::Provisioning(format!(
                "Failed to get target IQN for filer: {}",
                host.host_name
            )));
        }

        let auth = volume
            .provider_auth
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(ProviderAuth::from_str)
            .transpose()?;

        Ok(ConnectionInfo {
            driver_volume_type: "iscsi".to_string(),
            data: IscsiProperties {
                target_discovered: false,
                target_portal: portal.target_portal(),
                target_iqn: iqn,
                target_lun,
                volume_id: volume.id.clone(),
                auth,
            },
        })
    }

    /// Unmask the LUN from the host's initiator.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn terminate_connection(
        &self,
        volume: &VolumeRecord,
        connector: &HostConnector,
    ) -> Result<()> {
        let timer = OperationTimer::new("terminate_connection");
        timer.finish(self.disconnect(volume, connector).await)
    }

    async fn disconnect(&self, volume: &VolumeRecord, connector: &HostConnector) -> Result<()> {
        let lun = self.lun_details_for(volume).await?;
        self.mapper
            .ensure_unmapped(&lun.host_id, &lun.lun_path, &connector.initiator)
            .await
    }

    /// Snapshot as a LUN clone next to the volume's LUN. The filer volume
    /// grows by the snapshot size first.
    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.name))]
    pub async fn create_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let timer = OperationTimer::new("create_snapshot");
        timer.finish(self.snapshot_clone(snapshot).await)
    }

    async fn snapshot_clone(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let lun = self.snapshot_source(snapshot).await?;
        let filer = Filer::new(&self.dfm, &lun.host_id);
        filer
            .volume_resize(&lun.volume_name, VolumeResize::Grow(snapshot.volume_size_gb))
            .await?;

        let qtree_path = lun.qtree_path();
        let source = format!("{}/{}", qtree_path, lun.lun_name());
        let destination = format!("{}/{}", qtree_path, snapshot.name);
        let clone = filer.clone_start(&source, &destination, true).await?;
        self.jobs.wait_for_clone(&filer, &clone).await?;
        info!(source = %source, destination = %destination, "Created snapshot");
        Ok(())
    }

    /// Destroy the snapshot clone and give its space back to the volume.
    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.name))]
    pub async fn delete_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let timer = OperationTimer::new("delete_snapshot");
        timer.finish(self.destroy_snapshot(snapshot).await)
    }

    async fn destroy_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        let lun = self.snapshot_source(snapshot).await?;
        let filer = Filer::new(&self.dfm, &lun.host_id);
        let path = format!("{}/{}", lun.qtree_path(), snapshot.name);
        filer.lun_offline(&path).await?;
        filer.lun_destroy(&path).await?;
        filer
            .volume_resize(&lun.volume_name, VolumeResize::Shrink(snapshot.volume_size_gb))
            .await?;
        info!(path = %path, "Deleted snapshot");
        Ok(())
    }

    /// Clone a snapshot into a qtree named after the new volume, then
    /// rediscover it so it can be looked up like any other volume.
    #[instrument(skip(self, volume, snapshot), fields(volume = %volume.name, snapshot = %snapshot.name))]
    pub async fn create_volume_from_snapshot(
        &self,
        volume: &VolumeRecord,
        snapshot: &SnapshotRecord,
    ) -> Result<()> {
        let timer = OperationTimer::new("create_volume_from_snapshot");
        timer.finish(self.clone_from_snapshot(volume, snapshot).await)
    }

    async fn clone_from_snapshot(&self, volume: &VolumeRecord, snapshot: &SnapshotRecord) -> Result<()> {
        if volume.size_gb != snapshot.volume_size_gb {
            return Err(DriverError::Provisioning(format!(
                "Cannot create volume of size {} from snapshot of size {}",
                volume.size_gb, snapshot.volume_size_gb
            )));
        }

        let source_lun = self
            .cache
            .lookup(&snapshot.volume_name, &LunScope::project(&snapshot.project_id))
            .await?;
        let dataset = source_lun.dataset().cloned().ok_or_else(|| {
            DriverError::Provisioning(format!("LUN {} does not belong to a dataset", source_lun.id))
        })?;
        let new_type = volume.storage_class.as_deref().filter(|c| !c.is_empty());
        if new_type != dataset.storage_class.as_deref() {
            return Err(DriverError::Provisioning(format!(
                "Cannot create volume of type {} from snapshot of type {}",
                new_type.unwrap_or("None"),
                dataset.storage_class.as_deref().unwrap_or("None")
            )));
        }

        let lun = self.dfm.lun_details(&source_lun.id).await?;
        let filer = Filer::new(&self.dfm, &lun.host_id);
        filer
            .volume_resize(&lun.volume_name, VolumeResize::Grow(volume.size_gb))
            .await?;

        let clone_name = volume.name.as_str();
        filer.qtree_create(&lun.volume_name, clone_name).await?;
        let source = format!("{}/{}", lun.qtree_path(), snapshot.name);
        let destination = format!("/vol/{}/{}/{}", lun.volume_name, clone_name, clone_name);
        let clone = filer.clone_start(&source, &destination, false).await?;
        self.jobs.wait_for_clone(&filer, &clone).await?;

        self.jobs.refresh_luns(&lun.host_id).await?;
        let found = self
            .cache
            .refresh_dataset_luns(&self.dfm, &dataset, clone_name)
            .await?;
        info!(destination = %destination, discovered = found, "Created volume from snapshot");
        Ok(())
    }

    /// LUN details for a volume carrying a `provider_location`.
    async fn lun_details_for(&self, volume: &VolumeRecord) -> Result<LunInfo> {
        let lun_id = volume
            .provider_location
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DriverError::NotFound(format!("No LUN ID for volume {}", volume.name)))?;
        self.dfm.lun_details(lun_id).await
    }

    /// LUN details of the volume a snapshot was taken from.
    async fn snapshot_source(&self, snapshot: &SnapshotRecord) -> Result<LunInfo> {
        let lun = self
            .cache
            .lookup(&snapshot.volume_name, &LunScope::project(&snapshot.project_id))
            .await?;
        self.dfm.lun_details(&lun.id).await
    }
}
