//! DFM provisioning API access
//!
//! `Dfm` runs every DFM operation through the retry wrapper and converts
//! failures to `DriverError`. Enumerations follow the start / next / end
//! protocol, and the end call is issued even when a page fails.

pub mod api;
pub mod proxy;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use remote_client::{Connector, Endpoint, RemoteClient, RetryPolicy};
use tracing::{debug, warn};

pub use api::{DfmApi, DfmHandle};
pub use proxy::{ApiElement, ProxyRequest, ProxyResponse, ProxyStatus};
pub use types::{
    AboutInfo, DatasetInfo, DatasetMemberInfo, DatasetProvisionRequest, EditLockId, EventStatus,
    EventType, HostInfo, IterKind, IterTag, LunInfo, MetadataField, MonitorTimestamp,
    ProgressEvent, ProgressLunInfo, ProvisionMemberRequest, StorageSetDetails,
};

use crate::error::{DriverError, Result};

/// Records requested per `...IterNext` round trip
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct Dfm {
    client: Arc<RemoteClient<DfmHandle>>,
}

impl Dfm {
    pub fn new(client: Arc<RemoteClient<DfmHandle>>) -> Self {
        Self { client }
    }

    /// DFM access through a wrapper bound to one fixed server.
    pub fn fixed(
        connector: Arc<dyn Connector<DfmHandle>>,
        endpoint: Endpoint,
        policy: RetryPolicy,
    ) -> Self {
        Self::new(Arc::new(RemoteClient::fixed(connector, endpoint, policy)))
    }

    pub fn client(&self) -> &RemoteClient<DfmHandle> {
        &self.client
    }

    pub async fn about(&self) -> Result<AboutInfo> {
        Ok(self
            .client
            .call("DfmAbout", |api| async move { api.dfm_about().await })
            .await?)
    }

    /// All datasets, with metadata.
    pub async fn datasets(&self) -> Result<Vec<DatasetInfo>> {
        let tag = self
            .client
            .call("DatasetListInfoIterStart", |api| async move {
                api.dataset_list_iter_start(true).await
            })
            .await?;
        self.drain(tag, None, |api, tag| async move {
            api.dataset_list_iter_next(&tag, PAGE_SIZE).await
        })
        .await
    }

    /// LUN members of one dataset.
    pub async fn dataset_members(&self, dataset_id: &str) -> Result<Vec<DatasetMemberInfo>> {
        let tag = self
            .client
            .call("DatasetMemberListInfoIterStart", |api| async move {
                api.dataset_member_list_iter_start(dataset_id).await
            })
            .await?;
        self.drain(tag, None, |api, tag| async move {
            api.dataset_member_list_iter_next(&tag, PAGE_SIZE).await
        })
        .await
    }

    /// Latest progress events of one job.
    pub async fn job_progress(&self, job_id: &str) -> Result<Vec<ProgressEvent>> {
        let tag = self
            .client
            .call("DpJobProgressEventListIterStart", |api| async move {
                api.job_progress_iter_start(job_id).await
            })
            .await?;
        self.drain(tag, None, |api, tag| async move {
            api.job_progress_iter_next(&tag, PAGE_SIZE).await
        })
        .await
    }

    pub async fn lun_details(&self, lun_id: &str) -> Result<LunInfo> {
        let tag = self
            .client
            .call("LunListInfoIterStart", |api| async move {
                api.lun_list_iter_start(lun_id).await
            })
            .await?;
        self.drain(tag, Some(1), |api, tag| async move {
            api.lun_list_iter_next(&tag, 1).await
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DriverError::NotFound(format!("Failed to get LUN details for LUN ID {}", lun_id)))
    }

    /// Details of a storage system.
    pub async fn host_details(&self, host_id: &str) -> Result<HostInfo> {
        let tag = self
            .client
            .call("HostListInfoIterStart", |api| async move {
                api.host_list_iter_start(host_id).await
            })
            .await?;
        self.drain(tag, Some(1), |api, tag| async move {
            api.host_list_iter_next(&tag, 1).await
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DriverError::NotFound(format!("Failed to get host details for host ID {}", host_id)))
    }

    pub async fn edit_begin(&self, dataset_id: &str) -> Result<EditLockId> {
        Ok(self
            .client
            .call("DatasetEditBegin", |api| async move {
                api.dataset_edit_begin(dataset_id).await
            })
            .await?)
    }

    pub async fn provision_member(
        &self,
        lock: EditLockId,
        request: &ProvisionMemberRequest,
    ) -> Result<()> {
        Ok(self
            .client
            .call("DatasetProvisionMember", |api| async move {
                api.dataset_provision_member(lock, request).await
            })
            .await?)
    }

    /// Remove members from the dataset, destroying the storage when asked.
    pub async fn remove_member(
        &self,
        lock: EditLockId,
        member_ids: &[String],
        destroy: bool,
    ) -> Result<()> {
        Ok(self
            .client
            .call("DatasetRemoveMember", |api| async move {
                api.dataset_remove_member(lock, member_ids, destroy).await
            })
            .await?)
    }

    /// Commit with automatic confirmation; returns the started job ids.
    pub async fn edit_commit(&self, lock: EditLockId) -> Result<Vec<String>> {
        Ok(self
            .client
            .call("DatasetEditCommit", |api| async move {
                api.dataset_edit_commit(lock, true).await
            })
            .await?)
    }

    pub async fn edit_rollback(&self, lock: EditLockId) -> Result<()> {
        Ok(self
            .client
            .call("DatasetEditRollback", |api| async move {
                api.dataset_edit_rollback(lock).await
            })
            .await?)
    }

    /// Create a dataset from a storage service; returns the new dataset id.
    pub async fn provision_dataset(&self, request: &DatasetProvisionRequest) -> Result<String> {
        Ok(self
            .client
            .call("StorageServiceDatasetProvision", |api| async move {
                api.storage_service_dataset_provision(request).await
            })
            .await?)
    }

    /// Run a filer sub-operation on `target`; a `failed` status becomes
    /// `DriverError::ApiFailed`.
    pub async fn proxy(&self, target: &str, request: &ProxyRequest) -> Result<ApiElement> {
        debug!(target, api = %request.name, "Proxying filer API call");
        let response = self
            .client
            .call("ApiProxy", |api| async move { api.api_proxy(target, request).await })
            .await?;
        response.into_results(request)
    }

    pub async fn object_refresh(&self, object_name_or_id: &str, child_type: &str) -> Result<()> {
        Ok(self
            .client
            .call("DfmObjectRefresh", |api| async move {
                api.dfm_object_refresh(object_name_or_id, child_type).await
            })
            .await?)
    }

    pub async fn monitor_timestamps(&self, host_name_or_id: &str) -> Result<Vec<MonitorTimestamp>> {
        Ok(self
            .client
            .call("DfmMonitorTimestampList", |api| async move {
                api.dfm_monitor_timestamp_list(host_name_or_id).await
            })
            .await?)
    }

    /// Read pages from an open iteration, then release it.
    ///
    /// Stops at the first empty page, or once `limit` records are in. The
    /// end call runs whether or not reading succeeded; a read failure takes
    /// precedence over a failure to end.
    async fn drain<I, N, Fut>(&self, tag: IterTag, limit: Option<usize>, mut next: N) -> Result<Vec<I>>
    where
        N: FnMut(DfmHandle, IterTag) -> Fut,
        Fut: Future<Output = remote_client::Result<Vec<I>>>,
    {
        let collected = self.collect_pages(&tag, limit, &mut next).await;

        let end_operation = format!("{}IterEnd", tag.kind.api_prefix());
        let ended = self
            .client
            .call(&end_operation, |api| {
                let tag = tag.clone();
                async move { api.iter_end(&tag).await }
            })
            .await;

        match (collected, ended) {
            (Ok(items), Ok(())) => Ok(items),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(end_err)) => {
                warn!(tag = %tag, error = %end_err, "Failed to release iteration handle");
                Err(e)
            }
        }
    }

    async fn collect_pages<I, N, Fut>(
        &self,
        tag: &IterTag,
        limit: Option<usize>,
        next: &mut N,
    ) -> Result<Vec<I>>
    where
        N: FnMut(DfmHandle, IterTag) -> Fut,
        Fut: Future<Output = remote_client::Result<Vec<I>>>,
    {
        let operation = format!("{}IterNext", tag.kind.api_prefix());
        let mut items = Vec::new();
        loop {
            let page = self
                .client
                .call(&operation, |api| next(api, tag.clone()))
                .await?;
            if page.is_empty() {
                break;
            }
            items.extend(page);
            if limit.is_some_and(|limit| items.len() >= limit) {
                break;
            }
        }
        Ok(items)
    }
}
