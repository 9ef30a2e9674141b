//! Filer sub-operations through the DFM API proxy
//!
//! One method per sub-operation: build the arguments, run the proxy call,
//! and read the fields the driver needs out of the results tree.

use std::fmt;

use tracing::{debug, instrument};

use crate::dfm::{ApiElement, Dfm, ProxyRequest};
use crate::error::{DriverError, Result};

/// iSCSI portal of a storage system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portal {
    pub address: String,
    pub port: String,
    pub tpgroup_tag: String,
}

impl Portal {
    /// `address:port`
    pub fn target_portal(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Igroup {
    pub name: String,
    pub group_type: String,
    pub os_type: String,
    pub initiators: Vec<String>,
}

/// One igroup a LUN is mapped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunMapping {
    pub igroup_name: String,
    pub lun_id: u32,
}

/// Handle of a running clone operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneId {
    pub op_id: String,
    pub volume_uuid: String,
}

/// Change to a filer volume's size, in whole gigabytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeResize {
    Grow(u64),
    Shrink(u64),
}

impl fmt::Display for VolumeResize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeResize::Grow(gb) => write!(f, "+{}g", gb),
            VolumeResize::Shrink(gb) => write!(f, "-{}g", gb),
        }
    }
}

fn parse_lun_id(api: &str, raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|_| DriverError::ApiFailed {
        api: api.to_string(),
        reason: format!("invalid LUN id '{}'", raw),
    })
}

/// Proxy calls against one storage system
#[derive(Debug, Clone, Copy)]
pub struct Filer<'a> {
    dfm: &'a Dfm,
    host_id: &'a str,
}

impl<'a> Filer<'a> {
    pub fn new(dfm: &'a Dfm, host_id: &'a str) -> Self {
        Self { dfm, host_id }
    }

    pub fn host_id(&self) -> &str {
        self.host_id
    }

    async fn run(&self, request: ProxyRequest) -> Result<ApiElement> {
        self.dfm.proxy(self.host_id, &request).await
    }

    /// iSCSI target name of the storage system.
    pub async fn iscsi_node_name(&self) -> Result<String> {
        let api = "iscsi-node-get-name";
        let results = self.run(ProxyRequest::new(api)).await?;
        Ok(results.require_text(api, "node-name")?.to_string())
    }

    pub async fn portals(&self) -> Result<Vec<Portal>> {
        let api = "iscsi-portal-list-info";
        let results = self.run(ProxyRequest::new(api)).await?;
        results
            .list_items("iscsi-portal-list-entries", "iscsi-portal-list-entry-info")
            .into_iter()
            .map(|info| {
                Ok(Portal {
                    address: info.require_text(api, "ip-address")?.to_string(),
                    port: info.require_text(api, "ip-port")?.to_string(),
                    tpgroup_tag: info.require_text(api, "tpgroup-tag")?.to_string(),
                })
            })
            .collect()
    }

    /// Portal on `address`, or the last one listed when none matches.
    pub async fn target_portal(&self, address: &str) -> Result<Option<Portal>> {
        let portals = self.portals().await?;
        let matching = portals.iter().position(|p| p.address == address);
        Ok(match matching {
            Some(i) => portals.into_iter().nth(i),
            None => portals.into_iter().last(),
        })
    }

    pub async fn igroups(&self) -> Result<Vec<Igroup>> {
        let api = "igroup-list-info";
        let results = self.run(ProxyRequest::new(api)).await?;
        results
            .list_items("initiator-groups", "initiator-group-info")
            .into_iter()
            .map(|info| {
                let initiators = info
                    .list_items("initiators", "initiator-info")
                    .into_iter()
                    .filter_map(|i| i.child_text("initiator-name"))
                    .map(str::to_string)
                    .collect();
                Ok(Igroup {
                    name: info.require_text(api, "initiator-group-name")?.to_string(),
                    group_type: info.require_text(api, "initiator-group-type")?.to_string(),
                    os_type: info.require_text(api, "initiator-group-os-type")?.to_string(),
                    initiators,
                })
            })
            .collect()
    }

    /// Create an iSCSI igroup for Linux hosts.
    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn igroup_create(&self, name: &str) -> Result<()> {
        let request = ProxyRequest::new("igroup-create")
            .arg("initiator-group-name", name)
            .arg("initiator-group-type", "iscsi")
            .arg("os-type", "linux")
            .arg("ostype", "linux");
        self.run(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn igroup_add(&self, name: &str, initiator: &str) -> Result<()> {
        let request = ProxyRequest::new("igroup-add")
            .arg("initiator-group-name", name)
            .arg("initiator", initiator);
        self.run(request).await?;
        Ok(())
    }

    /// igroups `path` is currently mapped to.
    pub async fn lun_mappings(&self, path: &str) -> Result<Vec<LunMapping>> {
        let api = "lun-map-list-info";
        let results = self.run(ProxyRequest::new(api).arg("path", path)).await?;
        results
            .list_items("initiator-groups", "initiator-group-info")
            .into_iter()
            .map(|info| {
                Ok(LunMapping {
                    igroup_name: info.require_text(api, "initiator-group-name")?.to_string(),
                    lun_id: parse_lun_id(api, info.require_text(api, "lun-id")?)?,
                })
            })
            .collect()
    }

    /// Map `path` to `igroup`; the filer picks the lowest free LUN number.
    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn lun_map(&self, igroup: &str, path: &str) -> Result<u32> {
        let api = "lun-map";
        let request = ProxyRequest::new(api)
            .arg("initiator-group", igroup)
            .arg("path", path);
        let results = self.run(request).await?;
        parse_lun_id(api, results.require_text(api, "lun-id-assigned")?)
    }

    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn lun_unmap(&self, igroup: &str, path: &str) -> Result<()> {
        let request = ProxyRequest::new("lun-unmap")
            .arg("initiator-group", igroup)
            .arg("path", path);
        self.run(request).await?;
        Ok(())
    }

    /// Start a LUN clone; `snap` takes a backing snapshot first.
    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn clone_start(&self, source: &str, destination: &str, snap: bool) -> Result<CloneId> {
        let api = "clone-start";
        let request = ProxyRequest::new(api)
            .arg("source-path", source)
            .arg("no-snap", if snap { "false" } else { "true" })
            .arg("destination-path", destination);
        let results = self.run(request).await?;
        let info = results
            .require_child(api, "clone-id")?
            .require_child(api, "clone-id-info")?;
        let clone = CloneId {
            op_id: info.require_text(api, "clone-op-id")?.to_string(),
            volume_uuid: info.require_text(api, "volume-uuid")?.to_string(),
        };
        debug!(op_id = %clone.op_id, "Clone started");
        Ok(clone)
    }

    /// Whether the clone operation has completed.
    pub async fn clone_completed(&self, clone: &CloneId) -> Result<bool> {
        let api = "clone-list-status";
        let request = ProxyRequest::new(api).element(
            ApiElement::new("clone-id").with_child(
                ApiElement::new("clone-id-info")
                    .with_child(ApiElement::leaf("clone-op-id", clone.op_id.as_str()))
                    .with_child(ApiElement::leaf("volume-uuid", clone.volume_uuid.as_str())),
            ),
        );
        let results = self.run(request).await?;
        let state = results
            .child("status")
            .and_then(|status| status.child("ops-info"))
            .and_then(|ops| ops.child_text("clone-state"));
        Ok(state == Some("completed"))
    }

    pub async fn lun_offline(&self, path: &str) -> Result<()> {
        self.run(ProxyRequest::new("lun-offline").arg("path", path))
            .await?;
        Ok(())
    }

    pub async fn lun_destroy(&self, path: &str) -> Result<()> {
        self.run(ProxyRequest::new("lun-destroy").arg("path", path))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn volume_resize(&self, volume: &str, resize: VolumeResize) -> Result<()> {
        let request = ProxyRequest::new("volume-size")
            .arg("volume", volume)
            .arg("new-size", resize.to_string());
        self.run(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host_id))]
    pub async fn qtree_create(&self, volume: &str, qtree: &str) -> Result<()> {
        let request = ProxyRequest::new("qtree-create")
            .arg("mode", "0755")
            .arg("volume", volume)
            .arg("qtree", qtree);
        self.run(request).await?;
        Ok(())
    }
}
