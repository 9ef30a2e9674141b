//! LUN provisioning through DFM datasets
//!
//! A new LUN lands in the dataset of its (project, storage class) pair,
//! created from a storage service on first use. Membership changes run in
//! an edit transaction: begin, mutate, commit. Any failure in between rolls
//! the edit back before the error is surfaced. The jobs a commit starts are
//! polled to completion.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::DfmConfig;
use crate::dfm::{
    DatasetProvisionRequest, Dfm, EditLockId, MetadataField, ProvisionMemberRequest,
    StorageSetDetails,
};
use crate::discovery::{
    DATASET_PREFIX, Dataset, DiscoveryCache, Lun, LunOwner, LunScope, METADATA_PROJECT_KEY,
    METADATA_VOL_TYPE_KEY,
};
use crate::error::{DriverError, Result};
use crate::jobs::{JobMonitor, created_lun};
use crate::metrics;

/// Size used for a volume requested with size 0 (100 MiB)
pub const DEFAULT_VOLUME_SIZE: u64 = 104_857_600;
pub const GIGABYTE: u64 = 1 << 30;

/// Bytes to provision for a volume of `size_gb` gigabytes.
pub fn volume_size_bytes(size_gb: u64) -> u64 {
    if size_gb == 0 {
        DEFAULT_VOLUME_SIZE
    } else {
        size_gb.saturating_mul(GIGABYTE)
    }
}

/// LUN description from a volume's display name and description.
pub fn describe(display_name: Option<&str>, display_description: Option<&str>) -> Option<String> {
    let name = display_name.filter(|s| !s.is_empty());
    let description = display_description.filter(|s| !s.is_empty());
    match (name, description) {
        (Some(name), Some(description)) => Some(format!("{}\n{}", name, description)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

/// Dataset holding the LUNs of one (project, storage class) pair.
pub fn dataset_name(project: &str, storage_class: Option<&str>) -> String {
    let sanitize = |s: &str| s.replace([' ', '-'], "_");
    let mut name = format!("{}{}", DATASET_PREFIX, sanitize(project));
    if let Some(class) = storage_class.filter(|c| !c.is_empty()) {
        name.push('_');
        name.push_str(&sanitize(class));
    }
    name
}

/// Storage services new datasets are provisioned from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageServices {
    /// Service for volumes without a storage class
    pub default_service: Option<String>,
    /// Prefix completed by the storage class name
    pub service_prefix: Option<String>,
    pub vfiler: Option<String>,
}

impl StorageServices {
    pub fn from_config(config: &DfmConfig) -> Self {
        Self {
            default_service: config.storage_service.clone(),
            service_prefix: config.storage_service_prefix.clone(),
            vfiler: config.vfiler.clone(),
        }
    }

    /// Storage service for a storage class, or the default one.
    pub fn service_for(&self, storage_class: Option<&str>) -> Result<String> {
        match storage_class {
            Some(class) => match &self.service_prefix {
                Some(prefix) => Ok(format!("{}{}", prefix, class)),
                None => Err(DriverError::Configuration(
                    "Attempt to use volume_type without specifying netapp_storage_service_prefix flag."
                        .to_string(),
                )),
            },
            None => self.default_service.clone().ok_or_else(|| {
                DriverError::Configuration(
                    "You must set the netapp_storage_service flag in order to create volumes with no volume_type."
                        .to_string(),
                )
            }),
        }
    }
}

/// A LUN to provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunRequest {
    /// Volume name; becomes the last component of the LUN path
    pub name: String,
    pub description: Option<String>,
    pub project: String,
    pub storage_class: Option<String>,
    /// Size in bytes
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct Provisioner {
    dfm: Dfm,
    cache: Arc<DiscoveryCache>,
    jobs: JobMonitor,
    services: StorageServices,
}

impl Provisioner {
    pub fn new(dfm: Dfm, cache: Arc<DiscoveryCache>, jobs: JobMonitor, services: StorageServices) -> Self {
        Self {
            dfm,
            cache,
            jobs,
            services,
        }
    }

    /// Cached dataset for the pair, created when there is none.
    pub async fn resolve_dataset(&self, project: &str, storage_class: Option<&str>) -> Result<Dataset> {
        let name = dataset_name(project, storage_class);
        match self.cache.find_dataset(&name).await {
            Some(dataset) => Ok(dataset),
            None => self.create_dataset(&name, project, storage_class).await,
        }
    }

    /// Provision a dataset from the storage service, tagged with the
    /// project and storage class, and add it to the cache.
    #[instrument(skip(self))]
    pub async fn create_dataset(
        &self,
        name: &str,
        project: &str,
        storage_class: Option<&str>,
    ) -> Result<Dataset> {
        let storage_service = self.services.service_for(storage_class)?;
        let request = DatasetProvisionRequest {
            storage_service: storage_service.clone(),
            dataset_name: name.to_string(),
            assume_confirmation: true,
            storage_set: StorageSetDetails {
                dp_node_name: "Primary data".to_string(),
                export_protocol: "iscsi".to_string(),
                igroup_os_type: "linux".to_string(),
                server_name_or_id: self.services.vfiler.clone(),
            },
            metadata: vec![
                MetadataField::new(METADATA_PROJECT_KEY, Some(project.to_string())),
                MetadataField::new(METADATA_VOL_TYPE_KEY, storage_class.map(str::to_string)),
            ],
        };

        let id = self.dfm.provision_dataset(&request).await?;
        let dataset = Dataset {
            id,
            name: name.to_string(),
            project: project.to_string(),
            storage_class: storage_class.map(str::to_string),
        };
        info!(dataset = %dataset.name, id = %dataset.id, storage_service = %storage_service, "Created dataset");
        self.cache.add_dataset(dataset.clone()).await;
        Ok(dataset)
    }

    /// Provision a LUN and wait for the jobs that create it.
    ///
    /// The new LUN is added to the cache under the request name.
    #[instrument(skip(self, request), fields(name = %request.name, project = %request.project))]
    pub async fn provision(&self, request: &LunRequest) -> Result<Lun> {
        let storage_class = request.storage_class.as_deref().filter(|c| !c.is_empty());
        let dataset = self.resolve_dataset(&request.project, storage_class).await?;

        let member = ProvisionMemberRequest {
            name: request.name.clone(),
            description: request.description.clone(),
            size: request.size,
            maximum_snapshot_space: request.size.saturating_mul(2),
        };
        let dfm = &self.dfm;
        let member = &member;
        let job_ids = self
            .edit_transaction(&dataset, "Failed to provision dataset member", |lock| async move {
                dfm.provision_member(lock, member).await
            })
            .await?;

        let mut created = None;
        for job_id in &job_ids {
            let events = self.jobs.wait_for_job(job_id).await?;
            if let Some(lun) = created_lun(&events) {
                created = Some(lun);
            }
        }
        let Some((path, id)) = created else {
            return Err(DriverError::Provisioning(
                "No LUN was created by the provision job".to_string(),
            ));
        };

        let lun = Lun {
            owner: LunOwner::Dataset(dataset),
            path,
            id,
        };
        info!(path = %lun.path, id = %lun.id, "Provisioned LUN");
        self.cache
            .insert(&request.name, LunScope::project(&request.project), lun.clone())
            .await;
        Ok(lun)
    }

    /// Remove the volume's LUN from its dataset, destroying it on the filer.
    #[instrument(skip(self))]
    pub async fn remove_and_destroy(&self, name: &str, project: &str) -> Result<()> {
        let scope = LunScope::project(project);
        let lun = self.cache.lookup(name, &scope).await?;
        let dataset = lun.dataset().cloned().ok_or_else(|| {
            DriverError::Provisioning(format!("LUN {} does not belong to a dataset", lun.id))
        })?;

        let dfm = &self.dfm;
        let members = [lun.id.clone()];
        let members = &members[..];
        let job_ids = self
            .edit_transaction(
                &dataset,
                "Failed to remove and delete dataset member",
                |lock| async move { dfm.remove_member(lock, members, true).await },
            )
            .await?;
        // The removal is committed; a failed wait may still have removed the
        // LUN, so the entry goes either way and a later miss rescans.
        let waited = self.wait_for_jobs(&job_ids).await;
        self.cache.remove(name, &scope, &lun).await;
        if let Err(e) = waited {
            warn!(id = %lun.id, dataset = %dataset.name, error = %e, "Removal job did not finish");
            return Err(e);
        }

        info!(id = %lun.id, dataset = %dataset.name, "Removed and destroyed LUN");
        Ok(())
    }

    async fn wait_for_jobs(&self, job_ids: &[String]) -> Result<()> {
        for job_id in job_ids {
            self.jobs.wait_for_job(job_id).await?;
        }
        Ok(())
    }

    /// Run `mutate` under the dataset's edit lock and commit.
    ///
    /// When the mutation or the commit fails the edit is rolled back and a
    /// `Provisioning` error carrying `failure` is returned. Returns the ids
    /// of the jobs started by the commit.
    async fn edit_transaction<F, Fut>(
        &self,
        dataset: &Dataset,
        failure: &str,
        mutate: F,
    ) -> Result<Vec<String>>
    where
        F: FnOnce(EditLockId) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let lock = self.dfm.edit_begin(&dataset.id).await?;
        debug!(dataset = %dataset.name, lock = %lock, "Acquired edit lock");

        let outcome = match mutate(lock).await {
            Ok(()) => self.dfm.edit_commit(lock).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(job_ids) => {
                debug!(dataset = %dataset.name, jobs = job_ids.len(), "Committed edit");
                Ok(job_ids)
            }
            Err(e) => {
                warn!(dataset = %dataset.name, lock = %lock, error = %e, "Rolling back edit");
                metrics::record_rollback(&dataset.name);
                if let Err(rollback_err) = self.dfm.edit_rollback(lock).await {
                    warn!(dataset = %dataset.name, error = %rollback_err, "Rollback failed");
                }
                Err(DriverError::Provisioning(format!(
                    "{} in dataset {}: {}",
                    failure, dataset.name, e
                )))
            }
        }
    }
}
