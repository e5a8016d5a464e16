// src/tools/deploy.rs
// Step 9: apply the generated manifests to the cluster.

use serde::{Deserialize, Serialize};

use crate::drivers::ClusterInfo;
use crate::error::Result;
use crate::session::Session;
use crate::utils::now_rfc3339;

use super::{ToolContext, require_result, workspace_for};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeployResult {
    pub namespace: String,
    pub resources: Vec<String>,
    pub selector: String,
    pub applied_at: String,
}

pub struct DeployParams {
    pub namespace: String,
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &DeployParams,
) -> Result<DeployResult> {
    crate::validate::dns_label("namespace", &params.namespace)?;

    let manifest: super::manifest::ManifestResult = require_result(session, "deploy", "manifest")?;
    let _cluster: ClusterInfo = require_result(session, "deploy", "cluster")?;

    let workspace = workspace_for(ctx, session)?;
    let manifest_dir = workspace.resolve("manifests")?;
    let cancel = ctx.cancel();

    let applied = ctx
        .drivers()
        .cluster
        .apply_manifests(&manifest_dir, &params.namespace, &cancel)
        .await?;

    Ok(DeployResult {
        namespace: params.namespace.clone(),
        resources: applied.resources,
        selector: manifest.selector,
        applied_at: now_rfc3339(),
    })
}
