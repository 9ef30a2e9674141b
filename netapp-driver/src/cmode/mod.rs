//! C-mode driver through the workflow automation service
//!
//! Each LUN operation is a named workflow. Workflows are resolved to ids
//! once at setup, executed with `key=value` parameters, and their jobs
//! polled until they leave the running states.

pub mod api;
pub mod driver;

pub use api::{JobState, JobStatus, WfaApi, WfaHandle, WorkflowInfo, WorkflowParam};
pub use driver::{
    CmodeIscsiDriver, CmodeSnapshot, CmodeVolume, MapLunRequest, extract_volume_from_path,
};
