use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use remote_client::Result;

pub type WfaHandle = Arc<dyn WfaApi>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInfo {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowParam {
    pub name: String,
    pub value: String,
}

impl WorkflowParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Scheduled,
    Pending,
    Running,
    Completed,
    Failed,
    Other(String),
}

impl JobState {
    pub fn from_name(name: &str) -> Self {
        match name {
            "SCHEDULED" => JobState::Scheduled,
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "COMPLETED" => JobState::Completed,
            "FAILED" => JobState::Failed,
            other => JobState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Scheduled => f.write_str("SCHEDULED"),
            JobState::Pending => f.write_str("PENDING"),
            JobState::Running => f.write_str("RUNNING"),
            JobState::Completed => f.write_str("COMPLETED"),
            JobState::Failed => f.write_str("FAILED"),
            JobState::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// `Immediate` for jobs that run as soon as they are scheduled
    pub schedule_type: Option<String>,
    pub return_parameters: Vec<WorkflowParam>,
    pub error_message: Option<String>,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            schedule_type: None,
            return_parameters: Vec::new(),
            error_message: None,
        }
    }

    /// Whether the job is still expected to finish on its own.
    pub fn in_progress(&self) -> bool {
        let immediate = self.schedule_type.as_deref() == Some("Immediate");
        match self.state {
            JobState::Running => true,
            JobState::Scheduled | JobState::Pending => immediate,
            _ => false,
        }
    }
}

/// Workflow automation service operations, implemented by its SOAP
/// transport. Unreachable-server failures must be `RemoteError::Connection`.
#[async_trait]
pub trait WfaApi: Send + Sync {
    async fn get_all_workflows(&self) -> Result<Vec<WorkflowInfo>>;

    /// Start a workflow; returns the job id.
    async fn execute_workflow(&self, workflow_id: &str, input: &[String]) -> Result<String>;

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus>;
}
