use std::sync::Arc;

use async_trait::async_trait;
use remote_client::Result;

use super::proxy::{ProxyRequest, ProxyResponse};
use super::types::{
    AboutInfo, DatasetInfo, DatasetMemberInfo, DatasetProvisionRequest, EditLockId, HostInfo,
    IterTag, LunInfo, MonitorTimestamp, ProgressEvent, ProvisionMemberRequest,
};

/// Shared handle to a DFM transport, as created by a `Connector`
pub type DfmHandle = Arc<dyn DfmApi>;

/// Operations of the DFM provisioning API used by the driver.
///
/// Implemented by the SOAP transport. A failure to reach the server must be
/// reported as `RemoteError::Connection` so the wrapper can retry it; a
/// fault returned by the server is `RemoteError::Fault` (or `NotFound` /
/// `NotAuthorized` where the server says so).
#[async_trait]
pub trait DfmApi: Send + Sync {
    async fn dfm_about(&self) -> Result<AboutInfo>;

    /// Start enumerating all datasets, with their metadata when asked.
    async fn dataset_list_iter_start(&self, include_metadata: bool) -> Result<IterTag>;
    async fn dataset_list_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<DatasetInfo>>;

    /// Start enumerating the LUN members of a dataset, including indirect
    /// members and their export settings.
    async fn dataset_member_list_iter_start(&self, dataset_id: &str) -> Result<IterTag>;
    async fn dataset_member_list_iter_next(
        &self,
        tag: &IterTag,
        maximum: u32,
    ) -> Result<Vec<DatasetMemberInfo>>;

    async fn job_progress_iter_start(&self, job_id: &str) -> Result<IterTag>;
    async fn job_progress_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<ProgressEvent>>;

    async fn lun_list_iter_start(&self, object_name_or_id: &str) -> Result<IterTag>;
    async fn lun_list_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<LunInfo>>;

    async fn host_list_iter_start(&self, object_name_or_id: &str) -> Result<IterTag>;
    async fn host_list_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<HostInfo>>;

    /// Release an iteration handle of any kind.
    async fn iter_end(&self, tag: &IterTag) -> Result<()>;

    async fn dataset_edit_begin(&self, dataset_id: &str) -> Result<EditLockId>;
    async fn dataset_provision_member(
        &self,
        lock: EditLockId,
        request: &ProvisionMemberRequest,
    ) -> Result<()>;
    async fn dataset_remove_member(
        &self,
        lock: EditLockId,
        member_ids: &[String],
        destroy: bool,
    ) -> Result<()>;
    /// Commit an edit; returns the ids of the jobs it started.
    async fn dataset_edit_commit(&self, lock: EditLockId, assume_confirmation: bool)
    -> Result<Vec<String>>;
    async fn dataset_edit_rollback(&self, lock: EditLockId) -> Result<()>;

    /// Create a dataset from a storage service; returns the dataset id.
    async fn storage_service_dataset_provision(
        &self,
        request: &DatasetProvisionRequest,
    ) -> Result<String>;

    /// Forward a filer sub-operation to the storage system `target`.
    async fn api_proxy(&self, target: &str, request: &ProxyRequest) -> Result<ProxyResponse>;

    async fn dfm_object_refresh(&self, object_name_or_id: &str, child_type: &str) -> Result<()>;
    async fn dfm_monitor_timestamp_list(&self, host_name_or_id: &str)
    -> Result<Vec<MonitorTimestamp>>;
}
