// src/tools/build.rs
// Step 3: image build through the docker driver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::drivers::ImageBuilt;
use crate::error::Result;
use crate::session::Session;

use super::{ToolContext, require_result, workspace_for};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct BuildResult {
    pub reference: String,
    pub image_id: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
}

pub struct BuildParams {
    pub image: String,
    pub tag: String,
    pub build_args: BTreeMap<String, String>,
}

impl BuildParams {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &BuildParams,
) -> Result<BuildResult> {
    crate::validate::image_reference(&params.reference())?;
    // Build needs a Dockerfile in the workspace; the recorded result proves
    // the generation step ran for this session.
    let _dockerfile: super::dockerfile::DockerfileResult =
        require_result(session, "build", "dockerfile")?;

    let workspace = workspace_for(ctx, session)?;
    let reference = params.reference();
    let cancel = ctx.cancel();

    let built: ImageBuilt = ctx
        .drivers()
        .docker
        .build(
            workspace.root(),
            "Dockerfile",
            &reference,
            &params.build_args,
            &cancel,
        )
        .await?;

    Ok(BuildResult {
        reference: built.reference,
        image_id: built.image_id,
        size_bytes: built.size_bytes,
        duration_ms: built.duration_ms,
    })
}
