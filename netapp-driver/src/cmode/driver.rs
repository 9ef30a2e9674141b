use std::collections::HashMap;
use std::sync::Arc;

use remote_client::{Connector, RemoteClient};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::api::{JobState, JobStatus, WfaHandle};
use crate::config::{PollSettings, WfaConfig};
use crate::discovery::{DiscoveryCache, Location, Lun, LunOwner, LunScope};
use crate::error::{DriverError, Result};
use crate::jobs::with_deadline;
use crate::metrics::{self, OperationTimer};

pub const WORKFLOW_CREATE_LUN: &str = "Create CM Lun";
pub const WORKFLOW_MAP_LUN: &str = "Map CM Lun";
pub const WORKFLOW_UNMAP_LUN: &str = "Unmap CM Lun";
pub const WORKFLOW_REMOVE_LUN: &str = "Remove CM Lun";
pub const WORKFLOW_CLONE_LUN: &str = "Clone CM Lun";

/// Size in MiB for a volume requested without one
pub const DEFAULT_LUN_SIZE_MB: u64 = 100;
const MEGABYTE: u64 = 1 << 20;
pub const DEFAULT_OS_TYPE: &str = "linux";

/// Filer volume holding a C-mode LUN.
///
/// Accepts `/vol/<volume>/.../<lun>` and `/<volume>/<lun>`.
pub fn extract_volume_from_path(path: &str) -> Result<String> {
    let elements: Vec<&str> = path.split('/').collect();
    if elements.len() >= 4 && elements[1] == "vol" {
        return Ok(elements[2].to_string());
    }
    if elements.len() >= 3 {
        return Ok(elements[1].to_string());
    }
    Err(DriverError::Provisioning(format!(
        "CM volume not found in path {}",
        path
    )))
}

fn lun_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmodeVolume {
    pub name: String,
    /// Size in bytes; 0 requests the default size
    pub size_bytes: u64,
    pub os_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmodeSnapshot {
    pub name: String,
    pub volume_name: String,
    pub location: Location,
    /// Size of the source volume in bytes
    pub volume_size: u64,
}

/// Parameters of the map workflow; unset options are not sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLunRequest {
    pub location: Location,
    pub volume_name: String,
    pub lun_name: String,
    pub igroup_name: String,
    pub lun_id: Option<u32>,
    pub igroup_os_type: Option<String>,
    pub igroup_portset: Option<String>,
    pub igroup_protocol: String,
    /// Comma separated initiator names to add to the igroup
    pub initiators: Option<String>,
}

impl MapLunRequest {
    pub fn new(
        location: Location,
        volume_name: impl Into<String>,
        lun_name: impl Into<String>,
        igroup_name: impl Into<String>,
    ) -> Self {
        Self {
            location,
            volume_name: volume_name.into(),
            lun_name: lun_name.into(),
            igroup_name: igroup_name.into(),
            lun_id: None,
            igroup_os_type: Some("iscsi".to_string()),
            igroup_portset: None,
            igroup_protocol: "iscsi".to_string(),
            initiators: None,
        }
    }
}

type Params = Vec<(&'static str, String)>;

#[derive(Debug)]
pub struct CmodeIscsiDriver {
    client: Arc<RemoteClient<WfaHandle>>,
    workflows: RwLock<HashMap<String, String>>,
    cache: DiscoveryCache,
    settings: PollSettings,
}

impl CmodeIscsiDriver {
    pub fn new(config: &WfaConfig, connector: Arc<dyn Connector<WfaHandle>>) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        info!(endpoint = %endpoint, "Using workflow automation server");
        let client = RemoteClient::fixed(connector, endpoint, config.retry_policy());
        Ok(Self {
            client: Arc::new(client),
            workflows: RwLock::new(HashMap::new()),
            cache: DiscoveryCache::new(),
            settings: config.poll_settings(),
        })
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Resolve workflow names to ids; also checks the server answers.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> Result<usize> {
        let workflows = self
            .client
            .call("getAllWorkflows", |api| async move { api.get_all_workflows().await })
            .await?;
        let map: HashMap<String, String> = workflows.into_iter().map(|w| (w.name, w.id)).collect();
        let count = map.len();
        *self.workflows.write().await = map;
        debug!(count, "Resolved workflows");
        Ok(count)
    }

    /// Run a workflow and wait for its job; returns the job's return
    /// parameters.
    #[instrument(skip(self, params))]
    pub async fn execute_workflow(
        &self,
        name: &str,
        params: &[(&str, String)],
    ) -> Result<HashMap<String, String>> {
        let workflow_id = self
            .workflows
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::Configuration(format!("unknown workflow '{}'", name)))?;
        let input: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let input = &input[..];
        let workflow_id = workflow_id.as_str();

        let job_id = self
            .client
            .call("executeWorkflow", |api| async move {
                api.execute_workflow(workflow_id, input).await
            })
            .await?;
        debug!(job_id = %job_id, "Workflow started");

        let operation = format!("workflow '{}' job {}", name, job_id);
        let status = with_deadline(&operation, self.settings.job_timeout, self.poll_job(&job_id)).await?;

        match status.state {
            JobState::Completed => Ok(status
                .return_parameters
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect()),
            JobState::Failed => {
                let message = status
                    .error_message
                    .unwrap_or_else(|| format!("workflow '{}' failed", name));
                warn!(job_id = %job_id, error = %message, "Workflow failed");
                Err(DriverError::Provisioning(message))
            }
            other => Err(DriverError::Provisioning(format!(
                "Job did not complete successfully. Status: {}",
                other
            ))),
        }
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobStatus> {
        loop {
            metrics::record_poll("workflow");
            let status = self
                .client
                .call("getJobStatus", |api| async move { api.get_job_status(job_id).await })
                .await?;
            if !status.in_progress() {
                return Ok(status);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn create_volume(&self, volume: &CmodeVolume) -> Result<Lun> {
        let timer = OperationTimer::new("cmode_create_volume");
        timer.finish(self.create_lun(volume).await)
    }

    async fn create_lun(&self, volume: &CmodeVolume) -> Result<Lun> {
        let size_mb = match volume.size_bytes / MEGABYTE {
            0 => DEFAULT_LUN_SIZE_MB,
            mb => mb,
        };
        let os_type = volume.os_type.as_deref().unwrap_or(DEFAULT_OS_TYPE);
        let params: Params = vec![
            ("name", volume.name.clone()),
            ("os_type", os_type.to_string()),
            ("size_mb", size_mb.to_string()),
        ];
        let result = self.execute_workflow(WORKFLOW_CREATE_LUN, &params).await?;

        let field = |key: &str| {
            result.get(key).cloned().ok_or_else(|| {
                DriverError::Provisioning(format!(
                    "workflow '{}' returned no '{}'",
                    WORKFLOW_CREATE_LUN, key
                ))
            })
        };
        let location = Location::new(field("cluster")?, field("vserver")?);
        let path = field("lun_path")?;
        let lun = Lun {
            owner: LunOwner::Location(location.clone()),
            id: path.clone(),
            path,
        };
        info!(path = %lun.path, cluster = %location.cluster, vserver = %location.vserver, "Created LUN");
        self.cache
            .insert(&volume.name, LunScope::Location(location), lun.clone())
            .await;
        Ok(lun)
    }

    /// Destroy the volume's LUN and forget it.
    #[instrument(skip(self, location))]
    pub async fn delete_volume(&self, name: &str, location: &Location) -> Result<()> {
        let timer = OperationTimer::new("cmode_delete_volume");
        let result = self.remove_lun(name, location).await;
        timer.finish(result)
    }

    async fn remove_lun(&self, name: &str, location: &Location) -> Result<()> {
        let scope = LunScope::Location(location.clone());
        let lun = self.cache.lookup(name, &scope).await?;
        let volume_name = extract_volume_from_path(&lun.path)?;
        self.destroy_lun(name, &volume_name, location).await?;
        self.cache.remove(name, &scope, &lun).await;
        Ok(())
    }

    async fn destroy_lun(&self, lun_name: &str, volume_name: &str, location: &Location) -> Result<()> {
        let params: Params = vec![
            ("cluster_name", location.cluster.clone()),
            ("vserver_name", location.vserver.clone()),
            ("volume_name", volume_name.to_string()),
            ("lun_name", lun_name.to_string()),
            ("force", "Y".to_string()),
        ];
        self.execute_workflow(WORKFLOW_REMOVE_LUN, &params).await?;
        Ok(())
    }

    /// Clone `lun_name` within its filer volume.
    async fn clone_lun(
        &self,
        location: &Location,
        volume_name: &str,
        lun_name: &str,
        destination: &str,
    ) -> Result<()> {
        let mut params: Params = vec![
            ("cluster_name", location.cluster.clone()),
            ("vserver_name", location.vserver.clone()),
            ("volume_name", volume_name.to_string()),
            ("lun_name", lun_name.to_string()),
            ("space_reserved", "N".to_string()),
        ];
        if !destination.is_empty() {
            params.push(("rel_destination_path", destination.to_string()));
        }
        self.execute_workflow(WORKFLOW_CLONE_LUN, &params).await?;
        Ok(())
    }

    /// Snapshot as a clone of the volume's LUN.
    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.name))]
    pub async fn create_snapshot(&self, snapshot: &CmodeSnapshot) -> Result<()> {
        let timer = OperationTimer::new("cmode_create_snapshot");
        timer.finish(self.snapshot_clone(snapshot).await)
    }

    async fn snapshot_clone(&self, snapshot: &CmodeSnapshot) -> Result<()> {
        let scope = LunScope::Location(snapshot.location.clone());
        let lun = self.cache.lookup(&snapshot.volume_name, &scope).await?;
        let volume_name = extract_volume_from_path(&lun.path)?;
        self.clone_lun(&snapshot.location, &volume_name, lun_name_of(&lun.path), &snapshot.name)
            .await
    }

    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.name))]
    pub async fn delete_snapshot(&self, snapshot: &CmodeSnapshot) -> Result<()> {
        let timer = OperationTimer::new("cmode_delete_snapshot");
        timer.finish(self.destroy_snapshot(snapshot).await)
    }

    async fn destroy_snapshot(&self, snapshot: &CmodeSnapshot) -> Result<()> {
        let scope = LunScope::Location(snapshot.location.clone());
        let lun = self.cache.lookup(&snapshot.volume_name, &scope).await?;
        let volume_name = extract_volume_from_path(&lun.path)?;
        self.destroy_lun(&snapshot.name, &volume_name, &snapshot.location)
            .await
    }

    /// Clone a snapshot into a new volume next to it. The new LUN is cached
    /// under the volume name.
    #[instrument(skip(self, volume, snapshot), fields(volume = %volume.name, snapshot = %snapshot.name))]
    pub async fn create_volume_from_snapshot(
        &self,
        volume: &CmodeVolume,
        snapshot: &CmodeSnapshot,
    ) -> Result<Lun> {
        let timer = OperationTimer::new("cmode_create_volume_from_snapshot");
        timer.finish(self.clone_from_snapshot(volume, snapshot).await)
    }

    async fn clone_from_snapshot(&self, volume: &CmodeVolume, snapshot: &CmodeSnapshot) -> Result<Lun> {
        if volume.size_bytes != snapshot.volume_size {
            return Err(DriverError::Provisioning(format!(
                "Cannot create volume of size {} from snapshot of size {}",
                volume.size_bytes, snapshot.volume_size
            )));
        }
        let scope = LunScope::Location(snapshot.location.clone());
        let source = self.cache.lookup(&snapshot.volume_name, &scope).await?;
        let location = source.location().cloned().unwrap_or_else(|| snapshot.location.clone());
        let volume_name = extract_volume_from_path(&source.path)?;
        self.clone_lun(&location, &volume_name, &snapshot.name, &volume.name)
            .await?;

        let path = format!("/vol/{}/{}", volume_name, volume.name);
        let lun = Lun {
            owner: LunOwner::Location(location.clone()),
            id: path.clone(),
            path,
        };
        self.cache
            .insert(&volume.name, LunScope::Location(location), lun.clone())
            .await;
        Ok(lun)
    }

    /// Map a LUN to an igroup, creating the igroup when needed.
    #[instrument(skip(self, request), fields(lun = %request.lun_name, igroup = %request.igroup_name))]
    pub async fn map_lun(&self, request: &MapLunRequest) -> Result<()> {
        let mut params: Params = vec![
            ("cluster_name", request.location.cluster.clone()),
            ("vserver_name", request.location.vserver.clone()),
            ("vol_name", request.volume_name.clone()),
            ("lun_name", request.lun_name.clone()),
            ("igroup_name", request.igroup_name.clone()),
        ];
        if let Some(lun_id) = request.lun_id {
            params.push(("lun_id", lun_id.to_string()));
        }
        if let Some(os_type) = &request.igroup_os_type {
            params.push(("igroup_os_type", os_type.clone()));
            params.push(("igroup_protocol", request.igroup_protocol.clone()));
        }
        if let Some(portset) = &request.igroup_portset {
            params.push(("igroup_portset", portset.clone()));
        }
        if let Some(initiators) = &request.initiators {
            params.push(("initiators", initiators.clone()));
        }
        self.execute_workflow(WORKFLOW_MAP_LUN, &params).await?;
        Ok(())
    }

    #[instrument(skip(self, location))]
    pub async fn unmap_lun(
        &self,
        location: &Location,
        volume_name: &str,
        lun_name: &str,
        igroup_name: &str,
    ) -> Result<()> {
        let params: Params = vec![
            ("cluster_name", location.cluster.clone()),
            ("vserver_name", location.vserver.clone()),
            ("volume_name", volume_name.to_string()),
            ("lun_name", lun_name.to_string()),
            ("igroup_name", igroup_name.to_string()),
        ];
        self.execute_workflow(WORKFLOW_UNMAP_LUN, &params).await?;
        Ok(())
    }
}
