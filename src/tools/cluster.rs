// src/tools/cluster.rs
// Step 8: make sure a cluster is reachable, provisioning a local dev
// cluster when asked.

use crate::drivers::{ClusterInfo, ClusterTarget};
use crate::error::Result;
use crate::session::Session;

use super::ToolContext;

#[derive(Default)]
pub struct ClusterParams {
    pub context: Option<String>,
    pub provision_local: bool,
    pub name: Option<String>,
}

pub async fn execute(
    ctx: &impl ToolContext,
    _session: &Session,
    params: &ClusterParams,
) -> Result<ClusterInfo> {
    let target = ClusterTarget {
        context: params.context.clone(),
        provision_local: params.provision_local,
        name: params.name.clone(),
    };
    ctx.drivers().cluster.ensure_cluster(&target).await
}
