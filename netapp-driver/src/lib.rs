//! NetApp iSCSI volume driver
//!
//! Provisions LUNs through the OnCommand DFM provisioning API (7-mode) or
//! the workflow automation service (C-mode), keeps a local discovery cache
//! of the datasets and LUNs this system owns, and masks LUNs to host
//! initiators. Every remote call goes through `remote_client::RemoteClient`.

pub mod cmode;
pub mod config;
pub mod dfm;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod filer;
pub mod jobs;
pub mod mapping;
pub mod metrics;
pub mod provision;

pub use cmode::{CmodeIscsiDriver, WfaApi, WfaHandle};
pub use config::{DfmConfig, PollSettings, WfaConfig};
pub use dfm::{Dfm, DfmApi, DfmHandle};
pub use discovery::{Dataset, DiscoveryCache, Location, Lun, LunOwner, LunScope};
pub use driver::{
    ConnectionInfo, ExportInfo, HostConnector, IscsiProperties, NetAppIscsiDriver, ProviderAuth,
    SnapshotRecord, VolumeRecord,
};
pub use error::{DriverError, Result};
pub use mapping::InitiatorMapper;
pub use provision::{LunRequest, Provisioner, StorageServices};
