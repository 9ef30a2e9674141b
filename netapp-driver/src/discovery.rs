//! Discovery cache of the datasets and LUNs this system owns
//!
//! A discovery pass enumerates every dataset named with `DATASET_PREFIX`
//! and carrying the project metadata tag, then every LUN member of those
//! datasets, and swaps the result in under a write lock. Lookups consult a
//! fast index keyed by (scope, volume name) and fall back to a linear scan
//! over the cached LUNs, populating the index on a hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::dfm::{DatasetInfo, Dfm};
use crate::error::{DriverError, Result};
use crate::metrics;

/// Name prefix of datasets created by this system
pub const DATASET_PREFIX: &str = "OpenStack_";
/// Dataset metadata key holding the owning project
pub const METADATA_PROJECT_KEY: &str = "OpenStackProject";
/// Dataset metadata key holding the storage class
pub const METADATA_VOL_TYPE_KEY: &str = "OpenStackVolType";

/// Dataset owned by one (project, storage class) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub project: String,
    pub storage_class: Option<String>,
}

impl Dataset {
    /// Dataset this system owns, or `None` for anything else on the server.
    pub fn from_info(info: &DatasetInfo) -> Option<Self> {
        if !info.dataset_name.starts_with(DATASET_PREFIX) {
            return None;
        }
        let project = info
            .metadata_value(METADATA_PROJECT_KEY)
            .filter(|p| !p.is_empty())?;
        Some(Self {
            id: info.dataset_id.clone(),
            name: info.dataset_name.clone(),
            project: project.to_string(),
            storage_class: info
                .metadata_value(METADATA_VOL_TYPE_KEY)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }
}

/// C-mode LUN location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub cluster: String,
    pub vserver: String,
}

impl Location {
    pub fn new(cluster: impl Into<String>, vserver: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            vserver: vserver.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LunOwner {
    Dataset(Dataset),
    Location(Location),
}

/// What a lookup is confined to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LunScope {
    Project(String),
    Location(Location),
}

impl LunScope {
    pub fn project(project: impl Into<String>) -> Self {
        LunScope::Project(project.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lun {
    pub owner: LunOwner,
    /// `host:/volume/qtree/lun` for DFM, `/vol/volume/lun` for C-mode
    pub path: String,
    pub id: String,
}

impl Lun {
    pub fn dataset(&self) -> Option<&Dataset> {
        match &self.owner {
            LunOwner::Dataset(dataset) => Some(dataset),
            LunOwner::Location(_) => None,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match &self.owner {
            LunOwner::Location(location) => Some(location),
            LunOwner::Dataset(_) => None,
        }
    }

    pub fn in_scope(&self, scope: &LunScope) -> bool {
        match (&self.owner, scope) {
            (LunOwner::Dataset(dataset), LunScope::Project(project)) => &dataset.project == project,
            (LunOwner::Location(location), LunScope::Location(wanted)) => location == wanted,
            _ => false,
        }
    }

    /// Whether the path ends in `/<name>`.
    pub fn is_named(&self, name: &str) -> bool {
        self.path
            .strip_suffix(name)
            .is_some_and(|rest| rest.ends_with('/'))
    }
}

/// Result of a discovery pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub datasets: usize,
    pub luns: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    datasets: Vec<Dataset>,
    luns: Vec<Lun>,
    index: HashMap<(LunScope, String), Lun>,
}

#[derive(Debug, Default)]
pub struct DiscoveryCache {
    state: RwLock<CacheState>,
    scans: AtomicU64,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the cache from the server, replacing it wholesale.
    #[instrument(skip(self, dfm))]
    pub async fn discover(&self, dfm: &Dfm) -> Result<DiscoverySummary> {
        let mut datasets = Vec::new();
        let mut luns = Vec::new();

        for info in dfm.datasets().await? {
            let Some(dataset) = Dataset::from_info(&info) else {
                continue;
            };
            luns.extend(dataset_luns(dfm, &dataset, None).await?);
            datasets.push(dataset);
        }

        let summary = DiscoverySummary {
            datasets: datasets.len(),
            luns: luns.len(),
        };
        self.replace(datasets, luns).await;
        info!(
            datasets = summary.datasets,
            luns = summary.luns,
            "Discovered datasets and LUNs"
        );
        Ok(summary)
    }

    /// Re-enumerate one dataset's LUNs named `volume` and add them.
    #[instrument(skip(self, dfm, dataset), fields(dataset = %dataset.name))]
    pub async fn refresh_dataset_luns(
        &self,
        dfm: &Dfm,
        dataset: &Dataset,
        volume: &str,
    ) -> Result<usize> {
        let found = dataset_luns(dfm, dataset, Some(volume)).await?;
        let count = found.len();
        let mut state = self.state.write().await;
        state.luns.extend(found);
        metrics::set_discovered(state.datasets.len(), state.luns.len());
        debug!(count, "Added dataset LUNs");
        Ok(count)
    }

    /// Swap in a freshly built cache; the fast index starts empty.
    pub async fn replace(&self, datasets: Vec<Dataset>, luns: Vec<Lun>) {
        metrics::set_discovered(datasets.len(), luns.len());
        let mut state = self.state.write().await;
        *state = CacheState {
            datasets,
            luns,
            index: HashMap::new(),
        };
    }

    /// LUN for volume `name` within `scope`.
    ///
    /// Served from the fast index when present; otherwise one linear scan
    /// of the cached LUNs. A miss does not trigger re-discovery.
    pub async fn lookup(&self, name: &str, scope: &LunScope) -> Result<Lun> {
        let key = (scope.clone(), name.to_string());
        if let Some(lun) = self.state.read().await.index.get(&key) {
            return Ok(lun.clone());
        }

        let mut state = self.state.write().await;
        // Another caller may have filled the index meanwhile
        if let Some(lun) = state.index.get(&key) {
            return Ok(lun.clone());
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let found = state
            .luns
            .iter()
            .find(|lun| lun.in_scope(scope) && lun.is_named(name))
            .cloned();
        match found {
            Some(lun) => {
                state.index.insert(key, lun.clone());
                Ok(lun)
            }
            None => Err(DriverError::NotFound(format!(
                "No entry in LUN table for volume {}",
                name
            ))),
        }
    }

    /// Add a newly created LUN, indexed under `name`.
    pub async fn insert(&self, name: &str, scope: LunScope, lun: Lun) {
        let mut state = self.state.write().await;
        state.luns.push(lun.clone());
        state.index.insert((scope, name.to_string()), lun);
        metrics::set_discovered(state.datasets.len(), state.luns.len());
    }

    /// Drop a LUN from the cache and the index.
    pub async fn remove(&self, name: &str, scope: &LunScope, lun: &Lun) {
        let mut state = self.state.write().await;
        state.index.remove(&(scope.clone(), name.to_string()));
        state.luns.retain(|cached| cached != lun);
        metrics::set_discovered(state.datasets.len(), state.luns.len());
    }

    pub async fn find_dataset(&self, name: &str) -> Option<Dataset> {
        self.state
            .read()
            .await
            .datasets
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    pub async fn add_dataset(&self, dataset: Dataset) {
        let mut state = self.state.write().await;
        state.datasets.push(dataset);
        metrics::set_discovered(state.datasets.len(), state.luns.len());
    }

    pub async fn dataset_count(&self) -> usize {
        self.state.read().await.datasets.len()
    }

    pub async fn lun_count(&self) -> usize {
        self.state.read().await.luns.len()
    }

    /// Linear scans performed by `lookup` so far
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}

/// LUN members of `dataset`, restricted to paths ending in `/<volume>`.
async fn dataset_luns(dfm: &Dfm, dataset: &Dataset, volume: Option<&str>) -> Result<Vec<Lun>> {
    let suffix = volume.map(|v| format!("/{}", v));
    Ok(dfm
        .dataset_members(&dataset.id)
        .await?
        .into_iter()
        .filter(|m| {
            suffix
                .as_deref()
                .is_none_or(|suffix| m.member_name.ends_with(suffix))
        })
        .map(|m| Lun {
            owner: LunOwner::Dataset(dataset.clone()),
            path: m.member_name,
            id: m.member_id,
        })
        .collect())
}
