// src/tools/tag.rs
// Step 5: apply target references to the built image.

use serde::{Deserialize, Serialize};

use crate::error::{KitError, Result};
use crate::session::Session;

use super::{ToolContext, require_result};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TagResult {
    pub source: String,
    pub targets: Vec<String>,
}

pub struct TagParams {
    pub targets: Vec<String>,
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &TagParams,
) -> Result<TagResult> {
    if params.targets.is_empty() {
        return Err(KitError::validation("at least one target reference is required")
            .with_context("field", "targets"));
    }
    for target in &params.targets {
        crate::validate::image_reference(target)?;
    }

    let build: super::build::BuildResult = require_result(session, "tag", "build")?;

    for target in &params.targets {
        ctx.drivers().docker.tag(&build.reference, target).await?;
    }

    Ok(TagResult {
        source: build.reference,
        targets: params.targets.clone(),
    })
}
