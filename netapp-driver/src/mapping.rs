//! Idempotent LUN masking
//!
//! A LUN is presented to a host by mapping it to an igroup holding the
//! host's initiator. igroups created here are named `IGROUP_PREFIX` plus
//! the initiator name. Nothing is cached: igroups and mappings are read from
//! the filer on every call, since they can change outside this system.

use tracing::{debug, info, instrument};

use crate::dfm::Dfm;
use crate::error::Result;
use crate::filer::Filer;

/// Name prefix of igroups managed by this system
pub const IGROUP_PREFIX: &str = "openstack-";

/// Full filer path for a DFM LUN path (`volume/qtree/lun`).
pub fn full_lun_path(lun_path: &str) -> String {
    if lun_path.starts_with("/vol/") {
        lun_path.to_string()
    } else {
        format!("/vol/{}", lun_path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct InitiatorMapper {
    dfm: Dfm,
}

impl InitiatorMapper {
    pub fn new(dfm: Dfm) -> Self {
        Self { dfm }
    }

    /// Map the LUN to the initiator unless it already is; returns the LUN
    /// number either way.
    #[instrument(skip(self))]
    pub async fn ensure_mapped(&self, host_id: &str, lun_path: &str, initiator: &str) -> Result<u32> {
        let filer = Filer::new(&self.dfm, host_id);
        let path = full_lun_path(lun_path);

        let igroup = match find_igroup(&filer, initiator).await? {
            Some(igroup) => igroup,
            None => create_igroup(&filer, initiator).await?,
        };

        if let Some(lun_id) = mapped_lun_id(&filer, &path, &igroup).await? {
            debug!(igroup = %igroup, lun_id, "LUN already mapped");
            return Ok(lun_id);
        }

        let lun_id = filer.lun_map(&igroup, &path).await?;
        info!(igroup = %igroup, path = %path, lun_id, "Mapped LUN");
        Ok(lun_id)
    }

    /// Unmap the LUN from the initiator if it is mapped. The igroup is kept.
    #[instrument(skip(self))]
    pub async fn ensure_unmapped(&self, host_id: &str, lun_path: &str, initiator: &str) -> Result<()> {
        let filer = Filer::new(&self.dfm, host_id);
        let path = full_lun_path(lun_path);

        let Some(igroup) = find_igroup(&filer, initiator).await? else {
            debug!("No igroup for initiator");
            return Ok(());
        };

        if mapped_lun_id(&filer, &path, &igroup).await?.is_some() {
            filer.lun_unmap(&igroup, &path).await?;
            info!(igroup = %igroup, path = %path, "Unmapped LUN");
        }
        Ok(())
    }
}

/// Managed iSCSI/Linux igroup containing `initiator`.
async fn find_igroup(filer: &Filer<'_>, initiator: &str) -> Result<Option<String>> {
    let found = filer.igroups().await?.into_iter().find(|igroup| {
        igroup.group_type == "iscsi"
            && igroup.os_type == "linux"
            && igroup.name.starts_with(IGROUP_PREFIX)
            && igroup.initiators.iter().any(|i| i == initiator)
    });
    Ok(found.map(|igroup| igroup.name))
}

async fn create_igroup(filer: &Filer<'_>, initiator: &str) -> Result<String> {
    let name = format!("{}{}", IGROUP_PREFIX, initiator);
    filer.igroup_create(&name).await?;
    filer.igroup_add(&name, initiator).await?;
    info!(igroup = %name, "Created igroup");
    Ok(name)
}

async fn mapped_lun_id(filer: &Filer<'_>, path: &str, igroup: &str) -> Result<Option<u32>> {
    Ok(filer
        .lun_mappings(path)
        .await?
        .into_iter()
        .find(|m| m.igroup_name == igroup)
        .map(|m| m.lun_id))
}
