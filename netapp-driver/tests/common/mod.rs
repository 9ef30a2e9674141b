//! In-memory DFM and workflow automation servers for the driver tests
//!
//! `FakeDfm` keeps datasets, LUN members, jobs and one filer's igroups and
//! mappings. Every API call is appended to a call log, and open iteration
//! tags are tracked so tests can check each one was released.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use netapp_driver::cmode::{JobState, JobStatus, WorkflowInfo, WorkflowParam};
use netapp_driver::dfm::{
    AboutInfo, ApiElement, DatasetInfo, DatasetMemberInfo, DatasetProvisionRequest, EditLockId,
    EventStatus, EventType, HostInfo, IterKind, IterTag, LunInfo, MetadataField, MonitorTimestamp,
    ProgressEvent, ProgressLunInfo, ProvisionMemberRequest, ProxyRequest, ProxyResponse,
};
use netapp_driver::{
    CmodeIscsiDriver, DfmApi, DfmConfig, DfmHandle, NetAppIscsiDriver, WfaApi, WfaConfig,
    WfaHandle,
};
use remote_client::{Connector, Endpoint, FnConnector, RemoteError, Result};

pub const FILER_ID: &str = "host-1";
pub const FILER_NAME: &str = "filer1";
pub const FILER_ADDRESS: &str = "10.0.0.5";
pub const FILER_VOLUME: &str = "vol0";
pub const NODE_NAME: &str = "iqn.1992-08.com.netapp:sn.101";
pub const INITIATOR: &str = "iqn.1993-08.org.debian:01:abc";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("netapp_driver=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
enum Pages {
    Datasets(Vec<DatasetInfo>),
    Members(Vec<DatasetMemberInfo>),
    Events(Vec<ProgressEvent>),
    Luns(Vec<LunInfo>),
    Hosts(Vec<HostInfo>),
}

fn take<T>(items: &mut Vec<T>, maximum: u32) -> Vec<T> {
    let n = (maximum as usize).min(items.len());
    items.drain(..n).collect()
}

#[derive(Debug, Clone)]
enum Edit {
    Provision(ProvisionMemberRequest),
    Remove(Vec<String>),
}

#[derive(Debug, Clone)]
struct FakeJob {
    /// Polls answered with only a `job-start` event
    polls_left: u32,
    created: Option<ProgressLunInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeIgroup {
    pub name: String,
    pub group_type: String,
    pub os_type: String,
    pub initiators: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DfmState {
    pub datasets: Vec<DatasetInfo>,
    pub members: HashMap<String, Vec<DatasetMemberInfo>>,
    pub luns: HashMap<String, LunInfo>,
    pub calls: Vec<String>,
    pub open_tags: HashSet<String>,
    pub provisioned_datasets: Vec<DatasetProvisionRequest>,
    pub member_requests: Vec<ProvisionMemberRequest>,

    /// Polls each new job stays running for
    pub job_polls: u32,
    /// Error reported by every job once it has run
    pub job_error: Option<String>,
    pub fail_provision_member: bool,
    pub fail_commit: bool,
    /// Fail every `...IterNext` after the first page of this kind
    pub fail_pages: Option<IterKind>,
    /// Answer `...IterEnd` of this kind with a fault, after releasing the tag
    pub fail_iter_end: Option<IterKind>,
    /// Provision jobs finish without creating a LUN or reporting `lun-create`
    pub omit_lun_event: bool,
    /// Filer sub-operations answered with a failed status
    pub failing_filer_apis: HashSet<String>,

    pub igroups: Vec<FakeIgroup>,
    /// LUN path to (igroup, LUN number)
    pub mappings: HashMap<String, Vec<(String, u32)>>,
    pub portals: Vec<(String, String, String)>,
    pub node_name: String,
    /// Clone op id to polls left until completed
    pub clones: HashMap<String, u32>,
    pub clone_polls: u32,
    pub clone_requests: Vec<(String, String, bool)>,
    /// Clones into a qtree of their own, as (dataset, qtree, name); they
    /// become dataset members once the filer is refreshed
    clone_members: Vec<(String, String, String)>,
    pub volume_resizes: Vec<(String, String)>,
    pub qtrees: Vec<(String, String)>,
    pub destroyed: Vec<String>,
    pub refreshed: bool,

    iters: HashMap<String, Pages>,
    served_pages: HashMap<String, u32>,
    locks: HashMap<u64, String>,
    edits: HashMap<u64, Vec<Edit>>,
    jobs: HashMap<String, FakeJob>,
    next_id: u64,
}

impl DfmState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn log(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }

    fn open(&mut self, kind: IterKind, pages: Pages) -> IterTag {
        let tag = format!("tag-{}", self.next_id());
        self.open_tags.insert(tag.clone());
        self.iters.insert(tag.clone(), pages);
        IterTag::new(kind, tag)
    }

    fn page(&mut self, tag: &IterTag) -> Result<&mut Pages> {
        let served = self.served_pages.entry(tag.tag.clone()).or_insert(0);
        *served += 1;
        if self.fail_pages == Some(tag.kind) && *served > 1 {
            return Err(RemoteError::Fault(format!("iteration {} broke", tag)));
        }
        self.iters
            .get_mut(&tag.tag)
            .ok_or_else(|| RemoteError::Invalid(format!("unknown tag {}", tag)))
    }

    /// Add a LUN member to a dataset; returns its id.
    pub fn add_lun(&mut self, dataset_id: &str, qtree: &str, name: &str) -> String {
        let lun_id = format!("lun-{}", self.next_id());
        self.members
            .entry(dataset_id.to_string())
            .or_default()
            .push(DatasetMemberInfo {
                member_id: lun_id.clone(),
                member_name: format!("{}:/{}/{}/{}", FILER_NAME, FILER_VOLUME, qtree, name),
            });
        self.luns.insert(
            lun_id.clone(),
            LunInfo {
                lun_path: format!("{}/{}/{}", FILER_VOLUME, qtree, name),
                host_id: FILER_ID.to_string(),
                volume_name: FILER_VOLUME.to_string(),
                qtree_name: qtree.to_string(),
            },
        );
        lun_id
    }

    /// Add a dataset tagged with a project; returns its id.
    pub fn add_dataset(&mut self, name: &str, project: Option<&str>, vol_type: Option<&str>) -> String {
        let dataset_id = format!("ds-{}", self.next_id());
        let mut metadata = Vec::new();
        if let Some(project) = project {
            metadata.push(MetadataField::new("OpenStackProject", Some(project.to_string())));
        }
        metadata.push(MetadataField::new("OpenStackVolType", vol_type.map(str::to_string)));
        self.datasets.push(DatasetInfo {
            dataset_id: dataset_id.clone(),
            dataset_name: name.to_string(),
            metadata,
        });
        dataset_id
    }

    fn dataset_name(&self, dataset_id: &str) -> String {
        self.datasets
            .iter()
            .find(|d| d.dataset_id == dataset_id)
            .map(|d| d.dataset_name.clone())
            .unwrap_or_default()
    }

    fn start_job(&mut self, created: Option<ProgressLunInfo>) -> String {
        let job_id = format!("job-{}", self.next_id());
        self.jobs.insert(
            job_id.clone(),
            FakeJob {
                polls_left: self.job_polls,
                created,
            },
        );
        job_id
    }

    fn job_events(&mut self, job_id: &str) -> Result<Vec<ProgressEvent>> {
        let error = self.job_error.clone();
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| RemoteError::NotFound(format!("job {}", job_id)))?;
        let mut events = vec![ProgressEvent::new(EventType::JobStart, EventStatus::Normal)];
        if job.polls_left > 0 {
            job.polls_left -= 1;
            return Ok(events);
        }
        if let Some(message) = error {
            let mut failed = ProgressEvent::new(EventType::Other("job-progress".into()), EventStatus::Error);
            failed.error_message = Some(message);
            events.push(failed);
            return Ok(events);
        }
        if let Some(lun) = &job.created {
            let mut created = ProgressEvent::new(EventType::LunCreate, EventStatus::Normal);
            created.lun = Some(lun.clone());
            events.push(created);
        }
        events.push(ProgressEvent::new(EventType::JobEnd, EventStatus::Normal));
        Ok(events)
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| c.as_str() == call).count()
    }

    pub fn mapping_of(&self, path: &str, igroup: &str) -> Option<u32> {
        self.mappings
            .get(path)?
            .iter()
            .find(|(name, _)| name == igroup)
            .map(|(_, id)| *id)
    }

    /// Dataset member a clone at `destination` will show up as.
    fn clone_member(&self, source: &str, destination: &str) -> Option<(String, String, String)> {
        let source_qtree = source.split('/').nth(3)?;
        let parts: Vec<&str> = destination.split('/').collect();
        let [_, "vol", _, qtree, name] = parts.as_slice() else {
            return None;
        };
        if qtree != name {
            return None;
        }
        let dataset_id = self.members.iter().find_map(|(dataset_id, members)| {
            members
                .iter()
                .filter_map(|m| self.luns.get(&m.member_id))
                .any(|lun| lun.qtree_name == source_qtree)
                .then(|| dataset_id.clone())
        })?;
        Some((dataset_id, qtree.to_string(), name.to_string()))
    }

    fn proxy(&mut self, request: &ProxyRequest) -> ProxyResponse {
        if self.failing_filer_apis.contains(&request.name) {
            return ProxyResponse::failed(format!("{} is not permitted", request.name));
        }
        let arg = |name: &str| request.arg_text(name).unwrap_or_default().to_string();
        let results = ApiElement::new("results");
        match request.name.as_str() {
            "iscsi-node-get-name" => {
                ProxyResponse::passed(results.with_child(ApiElement::leaf("node-name", self.node_name.clone())))
            }
            "iscsi-portal-list-info" => {
                let mut list = ApiElement::new("iscsi-portal-list-entries");
                for (address, port, tag) in &self.portals {
                    list = list.with_child(
                        ApiElement::new("iscsi-portal-list-entry-info")
                            .with_child(ApiElement::leaf("ip-address", address.as_str()))
                            .with_child(ApiElement::leaf("ip-port", port.as_str()))
                            .with_child(ApiElement::leaf("tpgroup-tag", tag.as_str())),
                    );
                }
                ProxyResponse::passed(results.with_child(list))
            }
            "igroup-list-info" => {
                let mut list = ApiElement::new("initiator-groups");
                for igroup in &self.igroups {
                    let mut initiators = ApiElement::new("initiators");
                    for initiator in &igroup.initiators {
                        initiators = initiators.with_child(
                            ApiElement::new("initiator-info")
                                .with_child(ApiElement::leaf("initiator-name", initiator.as_str())),
                        );
                    }
                    list = list.with_child(
                        ApiElement::new("initiator-group-info")
                            .with_child(ApiElement::leaf("initiator-group-name", igroup.name.as_str()))
                            .with_child(ApiElement::leaf("initiator-group-type", igroup.group_type.as_str()))
                            .with_child(ApiElement::leaf("initiator-group-os-type", igroup.os_type.as_str()))
                            .with_child(initiators),
                    );
                }
                ProxyResponse::passed(results.with_child(list))
            }
            "igroup-create" => {
                self.igroups.push(FakeIgroup {
                    name: arg("initiator-group-name"),
                    group_type: arg("initiator-group-type"),
                    os_type: arg("os-type"),
                    initiators: Vec::new(),
                });
                ProxyResponse::passed(results)
            }
            "igroup-add" => {
                let name = arg("initiator-group-name");
                match self.igroups.iter_mut().find(|g| g.name == name) {
                    Some(igroup) => {
                        igroup.initiators.push(arg("initiator"));
                        ProxyResponse::passed(results)
                    }
                    None => ProxyResponse::failed(format!("no igroup {}", name)),
                }
            }
            "lun-map-list-info" => {
                let mut list = ApiElement::new("initiator-groups");
                for (igroup, lun_id) in self.mappings.get(&arg("path")).into_iter().flatten() {
                    list = list.with_child(
                        ApiElement::new("initiator-group-info")
                            .with_child(ApiElement::leaf("initiator-group-name", igroup.as_str()))
                            .with_child(ApiElement::leaf("lun-id", lun_id.to_string())),
                    );
                }
                ProxyResponse::passed(results.with_child(list))
            }
            "lun-map" => {
                let igroup = arg("initiator-group");
                let used: HashSet<u32> = self
                    .mappings
                    .values()
                    .flatten()
                    .filter(|(name, _)| *name == igroup)
                    .map(|(_, id)| *id)
                    .collect();
                let lun_id = (0..).find(|id| !used.contains(id)).unwrap_or_default();
                self.mappings
                    .entry(arg("path"))
                    .or_default()
                    .push((igroup, lun_id));
                ProxyResponse::passed(
                    results.with_child(ApiElement::leaf("lun-id-assigned", lun_id.to_string())),
                )
            }
            "lun-unmap" => {
                let igroup = arg("initiator-group");
                if let Some(mapped) = self.mappings.get_mut(&arg("path")) {
                    mapped.retain(|(name, _)| *name != igroup);
                }
                ProxyResponse::passed(results)
            }
            "clone-start" => {
                let op_id = format!("{}", self.next_id());
                self.clones.insert(op_id.clone(), self.clone_polls);
                let source = arg("source-path");
                let destination = arg("destination-path");
                if let Some(member) = self.clone_member(&source, &destination) {
                    self.clone_members.push(member);
                }
                self.clone_requests
                    .push((source, destination, arg("no-snap") == "false"));
                ProxyResponse::passed(
                    results.with_child(
                        ApiElement::new("clone-id").with_child(
                            ApiElement::new("clone-id-info")
                                .with_child(ApiElement::leaf("clone-op-id", op_id))
                                .with_child(ApiElement::leaf("volume-uuid", "uuid-vol0")),
                        ),
                    ),
                )
            }
            "clone-list-status" => {
                let op_id = request
                    .arg_element("clone-id")
                    .and_then(|id| id.child("clone-id-info"))
                    .and_then(|info| info.child_text("clone-op-id"))
                    .unwrap_or_default()
                    .to_string();
                let Some(left) = self.clones.get_mut(&op_id) else {
                    return ProxyResponse::failed(format!("no clone {}", op_id));
                };
                let state = if *left == 0 {
                    "completed"
                } else {
                    *left -= 1;
                    "running"
                };
                ProxyResponse::passed(results.with_child(
                    ApiElement::new("status").with_child(
                        ApiElement::new("ops-info").with_child(ApiElement::leaf("clone-state", state)),
                    ),
                ))
            }
            "volume-size" => {
                self.volume_resizes.push((arg("volume"), arg("new-size")));
                ProxyResponse::passed(results)
            }
            "qtree-create" => {
                self.qtrees.push((arg("volume"), arg("qtree")));
                ProxyResponse::passed(results)
            }
            "lun-offline" => ProxyResponse::passed(results),
            "lun-destroy" => {
                self.destroyed.push(arg("path"));
                ProxyResponse::passed(results)
            }
            other => ProxyResponse::failed(format!("unsupported API {}", other)),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeDfm {
    pub state: Mutex<DfmState>,
}

impl FakeDfm {
    /// One filer with one portal on its management address
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        {
            let mut state = fake.state.lock().unwrap();
            state.node_name = NODE_NAME.to_string();
            state.portals = vec![(FILER_ADDRESS.to_string(), "3260".to_string(), "1000".to_string())];
        }
        Arc::new(fake)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut DfmState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.with(|s| s.count_calls(call))
    }

    pub fn open_tags(&self) -> usize {
        self.with(|s| s.open_tags.len())
    }
}

#[async_trait]
impl DfmApi for FakeDfm {
    async fn dfm_about(&self) -> Result<AboutInfo> {
        self.with(|s| s.log("DfmAbout"));
        Ok(AboutInfo {
            version: "4.0".to_string(),
        })
    }

    async fn dataset_list_iter_start(&self, _include_metadata: bool) -> Result<IterTag> {
        Ok(self.with(|s| {
            s.log("DatasetListInfoIterStart");
            let datasets = s.datasets.clone();
            s.open(IterKind::Datasets, Pages::Datasets(datasets))
        }))
    }

    async fn dataset_list_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<DatasetInfo>> {
        self.with(|s| match s.page(tag)? {
            Pages::Datasets(items) => Ok(take(items, maximum)),
            _ => Err(RemoteError::Invalid(format!("wrong tag {}", tag))),
        })
    }

    async fn dataset_member_list_iter_start(&self, dataset_id: &str) -> Result<IterTag> {
        Ok(self.with(|s| {
            s.log("DatasetMemberListInfoIterStart");
            let members = s.members.get(dataset_id).cloned().unwrap_or_default();
            s.open(IterKind::DatasetMembers, Pages::Members(members))
        }))
    }

    async fn dataset_member_list_iter_next(
        &self,
        tag: &IterTag,
        maximum: u32,
    ) -> Result<Vec<DatasetMemberInfo>> {
        self.with(|s| match s.page(tag)? {
            Pages::Members(items) => Ok(take(items, maximum)),
            _ => Err(RemoteError::Invalid(format!("wrong tag {}", tag))),
        })
    }

    async fn job_progress_iter_start(&self, job_id: &str) -> Result<IterTag> {
        self.with(|s| {
            s.log("DpJobProgressEventListIterStart");
            let events = s.job_events(job_id)?;
            Ok(s.open(IterKind::JobProgress, Pages::Events(events)))
        })
    }

    async fn job_progress_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<ProgressEvent>> {
        self.with(|s| match s.page(tag)? {
            Pages::Events(items) => Ok(take(items, maximum)),
            _ => Err(RemoteError::Invalid(format!("wrong tag {}", tag))),
        })
    }

    async fn lun_list_iter_start(&self, object_name_or_id: &str) -> Result<IterTag> {
        Ok(self.with(|s| {
            s.log("LunListInfoIterStart");
            let luns = s.luns.get(object_name_or_id).cloned().into_iter().collect();
            s.open(IterKind::Luns, Pages::Luns(luns))
        }))
    }

    async fn lun_list_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<LunInfo>> {
        self.with(|s| match s.page(tag)? {
            Pages::Luns(items) => Ok(take(items, maximum)),
            _ => Err(RemoteError::Invalid(format!("wrong tag {}", tag))),
        })
    }

    async fn host_list_iter_start(&self, object_name_or_id: &str) -> Result<IterTag> {
        Ok(self.with(|s| {
            s.log("HostListInfoIterStart");
            let hosts = if object_name_or_id == FILER_ID {
                vec![HostInfo {
                    host_id: FILER_ID.to_string(),
                    host_name: FILER_NAME.to_string(),
                    host_address: FILER_ADDRESS.to_string(),
                }]
            } else {
                Vec::new()
            };
            s.open(IterKind::Hosts, Pages::Hosts(hosts))
        }))
    }

    async fn host_list_iter_next(&self, tag: &IterTag, maximum: u32) -> Result<Vec<HostInfo>> {
        self.with(|s| match s.page(tag)? {
            Pages::Hosts(items) => Ok(take(items, maximum)),
            _ => Err(RemoteError::Invalid(format!("wrong tag {}", tag))),
        })
    }

    async fn iter_end(&self, tag: &IterTag) -> Result<()> {
        self.with(|s| {
            s.log(format!("{}IterEnd", tag.kind.api_prefix()));
            s.iters.remove(&tag.tag);
            let was_open = s.open_tags.remove(&tag.tag);
            if s.fail_iter_end == Some(tag.kind) {
                return Err(RemoteError::Fault(format!("could not release {}", tag)));
            }
            if was_open {
                Ok(())
            } else {
                Err(RemoteError::Invalid(format!("tag {} is not open", tag)))
            }
        })
    }

    async fn dataset_edit_begin(&self, dataset_id: &str) -> Result<EditLockId> {
        Ok(self.with(|s| {
            s.log("DatasetEditBegin");
            let lock = s.next_id();
            s.locks.insert(lock, dataset_id.to_string());
            EditLockId(lock)
        }))
    }

    async fn dataset_provision_member(
        &self,
        lock: EditLockId,
        request: &ProvisionMemberRequest,
    ) -> Result<()> {
        self.with(|s| {
            s.log("DatasetProvisionMember");
            if s.fail_provision_member {
                return Err(RemoteError::Fault("not enough space".to_string()));
            }
            s.member_requests.push(request.clone());
            s.edits
                .entry(lock.0)
                .or_default()
                .push(Edit::Provision(request.clone()));
            Ok(())
        })
    }

    async fn dataset_remove_member(
        &self,
        lock: EditLockId,
        member_ids: &[String],
        _destroy: bool,
    ) -> Result<()> {
        self.with(|s| {
            s.log("DatasetRemoveMember");
            s.edits
                .entry(lock.0)
                .or_default()
                .push(Edit::Remove(member_ids.to_vec()));
            Ok(())
        })
    }

    async fn dataset_edit_commit(&self, lock: EditLockId, _assume_confirmation: bool) -> Result<Vec<String>> {
        self.with(|s| {
            s.log("DatasetEditCommit");
            if s.fail_commit {
                return Err(RemoteError::Fault("conformance check failed".to_string()));
            }
            let dataset_id = s
                .locks
                .remove(&lock.0)
                .ok_or_else(|| RemoteError::Invalid(format!("lock {} is not held", lock)))?;
            let qtree = s.dataset_name(&dataset_id);
            let mut job_ids = Vec::new();
            for edit in s.edits.remove(&lock.0).unwrap_or_default() {
                let job_id = match edit {
                    Edit::Provision(_) if s.omit_lun_event => s.start_job(None),
                    Edit::Provision(request) => {
                        let lun_id = s.add_lun(&dataset_id, &qtree, &request.name);
                        let lun_name = format!("{}:/{}/{}/{}", FILER_NAME, FILER_VOLUME, qtree, request.name);
                        s.start_job(Some(ProgressLunInfo {
                            lun_name,
                            lun_path_id: lun_id,
                        }))
                    }
                    Edit::Remove(ids) => {
                        if let Some(members) = s.members.get_mut(&dataset_id) {
                            members.retain(|m| !ids.contains(&m.member_id));
                        }
                        for id in &ids {
                            s.luns.remove(id);
                        }
                        s.start_job(None)
                    }
                };
                job_ids.push(job_id);
            }
            Ok(job_ids)
        })
    }

    async fn dataset_edit_rollback(&self, lock: EditLockId) -> Result<()> {
        self.with(|s| {
            s.log("DatasetEditRollback");
            s.locks.remove(&lock.0);
            s.edits.remove(&lock.0);
            Ok(())
        })
    }

    async fn storage_service_dataset_provision(&self, request: &DatasetProvisionRequest) -> Result<String> {
        Ok(self.with(|s| {
            s.log("StorageServiceDatasetProvision");
            s.provisioned_datasets.push(request.clone());
            let dataset_id = format!("ds-{}", s.next_id());
            s.datasets.push(DatasetInfo {
                dataset_id: dataset_id.clone(),
                dataset_name: request.dataset_name.clone(),
                metadata: request.metadata.clone(),
            });
            dataset_id
        }))
    }

    async fn api_proxy(&self, target: &str, request: &ProxyRequest) -> Result<ProxyResponse> {
        self.with(|s| {
            s.log(format!("ApiProxy:{}", request.name));
            if target != FILER_ID {
                return Err(RemoteError::NotFound(format!("host {}", target)));
            }
            Ok(s.proxy(request))
        })
    }

    async fn dfm_object_refresh(&self, _object_name_or_id: &str, _child_type: &str) -> Result<()> {
        self.with(|s| {
            s.log("DfmObjectRefresh");
            s.refreshed = true;
            for (dataset_id, qtree, name) in std::mem::take(&mut s.clone_members) {
                s.add_lun(&dataset_id, &qtree, &name);
            }
        });
        Ok(())
    }

    async fn dfm_monitor_timestamp_list(&self, _host_name_or_id: &str) -> Result<Vec<MonitorTimestamp>> {
        Ok(self.with(|s| {
            s.log("DfmMonitorTimestampList");
            vec![MonitorTimestamp {
                monitor_name: "lun".to_string(),
                last_monitoring_timestamp: s.refreshed.then_some(1_286_793_022),
            }]
        }))
    }
}

pub fn dfm_config() -> DfmConfig {
    DfmConfig {
        wsdl_url: Some("http://dfm.example.com:8088/apis/soap/v1/wsdl".to_string()),
        login: Some("admin".to_string()),
        password: Some("secret".to_string()),
        server_hostname: Some("dfm.example.com".to_string()),
        storage_service: Some("Default Service".to_string()),
        storage_service_prefix: Some("Service_".to_string()),
        poll_interval_secs: 1,
        monitor_interval_secs: 1,
        job_timeout_secs: 60,
        ..DfmConfig::default()
    }
}

pub fn dfm_connector(fake: Arc<FakeDfm>) -> Arc<dyn Connector<DfmHandle>> {
    Arc::new(FnConnector::new(move |_: &Endpoint| Ok(fake.clone() as DfmHandle)))
}

pub fn driver_with(fake: Arc<FakeDfm>, config: &DfmConfig) -> NetAppIscsiDriver {
    NetAppIscsiDriver::new(config, dfm_connector(fake)).unwrap()
}

pub fn driver(fake: Arc<FakeDfm>) -> NetAppIscsiDriver {
    driver_with(fake, &dfm_config())
}

// ============================================================================
// Workflow automation
// ============================================================================

#[derive(Debug, Default)]
pub struct WfaState {
    pub workflows: Vec<WorkflowInfo>,
    /// (workflow id, input) of every execution
    pub executions: Vec<(String, Vec<String>)>,
    /// Status polls a job stays running for
    pub job_polls: u32,
    /// Final state of every job
    pub final_state: Option<JobState>,
    pub error_message: Option<String>,
    pub return_parameters: Vec<WorkflowParam>,
    pub status_calls: u32,
    jobs: HashMap<String, u32>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct FakeWfa {
    pub state: Mutex<WfaState>,
}

impl FakeWfa {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().workflows = [
            "Create CM Lun",
            "Map CM Lun",
            "Unmap CM Lun",
            "Remove CM Lun",
            "Clone CM Lun",
        ]
        .iter()
        .enumerate()
        .map(|(i, name)| WorkflowInfo {
            name: name.to_string(),
            id: format!("wf-{}", i),
        })
        .collect();
        Arc::new(fake)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut WfaState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Inputs of the executions of one workflow
    pub fn inputs_of(&self, workflow_name: &str) -> Vec<Vec<String>> {
        self.with(|s| {
            let Some(id) = s
                .workflows
                .iter()
                .find(|w| w.name == workflow_name)
                .map(|w| w.id.clone())
            else {
                return Vec::new();
            };
            s.executions
                .iter()
                .filter(|(workflow_id, _)| *workflow_id == id)
                .map(|(_, input)| input.clone())
                .collect()
        })
    }
}

#[async_trait]
impl WfaApi for FakeWfa {
    async fn get_all_workflows(&self) -> Result<Vec<WorkflowInfo>> {
        Ok(self.with(|s| s.workflows.clone()))
    }

    async fn execute_workflow(&self, workflow_id: &str, input: &[String]) -> Result<String> {
        Ok(self.with(|s| {
            s.executions.push((workflow_id.to_string(), input.to_vec()));
            s.next_id += 1;
            let job_id = format!("{}", s.next_id);
            s.jobs.insert(job_id.clone(), s.job_polls);
            job_id
        }))
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus> {
        self.with(|s| {
            s.status_calls += 1;
            let left = s
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| RemoteError::NotFound(format!("job {}", job_id)))?;
            if *left > 0 {
                *left -= 1;
                return Ok(JobStatus::new(JobState::Running));
            }
            let mut status = JobStatus::new(s.final_state.clone().unwrap_or(JobState::Completed));
            status.schedule_type = Some("Immediate".to_string());
            status.error_message = s.error_message.clone();
            status.return_parameters = s.return_parameters.clone();
            Ok(status)
        })
    }
}

pub fn wfa_config() -> WfaConfig {
    WfaConfig {
        wsdl_url: Some("http://wfa.example.com/wfa-ws/WorkflowService_pttBinding?wsdl".to_string()),
        login: Some("admin".to_string()),
        password: Some("secret".to_string()),
        poll_interval_secs: 1,
        job_timeout_secs: 60,
        ..WfaConfig::default()
    }
}

pub async fn cmode_driver(fake: Arc<FakeWfa>) -> CmodeIscsiDriver {
    let connector: Arc<dyn Connector<WfaHandle>> =
        Arc::new(FnConnector::new(move |_: &Endpoint| Ok(fake.clone() as WfaHandle)));
    let driver = CmodeIscsiDriver::new(&wfa_config(), connector).unwrap();
    driver.setup().await.unwrap();
    driver
}
