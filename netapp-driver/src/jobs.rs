//! Polling of asynchronous server-side work
//!
//! Provisioning jobs, filer clone operations and LUN monitor refreshes all
//! finish in the background. Each wait here polls at a fixed interval and
//! gives up with `DriverError::Timeout` once the configured deadline passes.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::config::PollSettings;
use crate::dfm::{Dfm, EventStatus, EventType, ProgressEvent};
use crate::error::{DriverError, Result};
use crate::filer::{CloneId, Filer};
use crate::metrics;

/// Monitor whose timestamp shows the LUN list is current
const LUN_MONITOR: &str = "lun";

#[derive(Debug, Clone)]
pub struct JobMonitor {
    dfm: Dfm,
    settings: PollSettings,
}

impl JobMonitor {
    pub fn new(dfm: Dfm, settings: PollSettings) -> Self {
        Self { dfm, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll a provisioning job until it ends; returns its final events.
    ///
    /// An event with status `error` fails the wait with the job's error
    /// message.
    #[instrument(skip(self))]
    pub async fn wait_for_job(&self, job_id: &str) -> Result<Vec<ProgressEvent>> {
        let operation = format!("job {}", job_id);
        with_deadline(&operation, self.settings.job_timeout, self.poll_job(job_id)).await
    }

    /// Poll a filer clone operation until its state is `completed`.
    #[instrument(skip(self, filer, clone), fields(host = %filer.host_id(), op_id = %clone.op_id))]
    pub async fn wait_for_clone(&self, filer: &Filer<'_>, clone: &CloneId) -> Result<()> {
        let operation = format!("clone {}", clone.op_id);
        with_deadline(&operation, self.settings.job_timeout, self.poll_clone(filer, clone)).await
    }

    /// Ask DFM to rescan a filer's LUNs and wait until the LUN monitor has
    /// reported.
    #[instrument(skip(self))]
    pub async fn refresh_luns(&self, host_id: &str) -> Result<()> {
        self.dfm.object_refresh(host_id, "lun_path").await?;
        let operation = format!("LUN monitor refresh on {}", host_id);
        with_deadline(&operation, self.settings.job_timeout, self.poll_monitor(host_id)).await
    }

    async fn poll_job(&self, job_id: &str) -> Result<Vec<ProgressEvent>> {
        loop {
            metrics::record_poll("job");
            let events = self.dfm.job_progress(job_id).await?;
            for event in &events {
                if event.status == EventStatus::Error {
                    let message = event.error_message.as_deref().unwrap_or("unknown error");
                    warn!(job_id, error = message, "Job failed");
                    return Err(DriverError::Provisioning(format!("Job failed: {}", message)));
                }
                if event.event_type == EventType::JobEnd {
                    debug!(job_id, events = events.len(), "Job finished");
                    return Ok(events);
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn poll_clone(&self, filer: &Filer<'_>, clone: &CloneId) -> Result<()> {
        loop {
            metrics::record_poll("clone");
            if filer.clone_completed(clone).await? {
                debug!("Clone completed");
                return Ok(());
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn poll_monitor(&self, host_id: &str) -> Result<()> {
        loop {
            tokio::time::sleep(self.settings.monitor_interval).await;
            metrics::record_poll("monitor");
            let timestamps = self.dfm.monitor_timestamps(host_id).await?;
            let refreshed = timestamps
                .iter()
                .any(|t| t.monitor_name == LUN_MONITOR && t.last_monitoring_timestamp.is_some());
            if refreshed {
                debug!("LUN monitor refreshed");
                return Ok(());
            }
        }
    }
}

/// Lun created by a finished provisioning job, as (path, id).
///
/// The last `lun-create` event wins when there are several.
pub fn created_lun(events: &[ProgressEvent]) -> Option<(String, String)> {
    events
        .iter()
        .filter(|e| e.event_type == EventType::LunCreate)
        .filter_map(|e| e.lun.as_ref())
        .map(|lun| (lun.lun_name.clone(), lun.lun_path_id.clone()))
        .last()
}

pub(crate) async fn with_deadline<T, F>(operation: &str, deadline: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, waited = ?deadline, "Gave up waiting");
            Err(DriverError::Timeout {
                operation: operation.to_string(),
                waited: deadline,
            })
        }
    }
}
