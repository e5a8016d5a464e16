// src/tools/push.rs
// Step 6: push a tagged reference to its registry. Transient network faults
// are retried inside the docker driver before they ever surface here.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::Session;

use super::{ToolContext, require_result};

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct PushResult {
    pub reference: String,
    pub digest: String,
    pub pushed_at: String,
}

#[derive(Default)]
pub struct PushParams {
    /// Reference to push; defaults to the first tag target, falling back to
    /// the build reference (implicit tag).
    pub reference: Option<String>,
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &PushParams,
) -> Result<PushResult> {
    let reference = match &params.reference {
        Some(reference) => {
            crate::validate::image_reference(reference)?;
            reference.clone()
        }
        None => match session.typed_result::<super::tag::TagResult>("tag") {
            Some(tag) if !tag.targets.is_empty() => tag.targets[0].clone(),
            _ => {
                let build: super::build::BuildResult = require_result(session, "push", "build")?;
                build.reference
            }
        },
    };

    let cancel = ctx.cancel();
    let pushed = ctx.drivers().docker.push(&reference, &cancel).await?;

    Ok(PushResult {
        reference: pushed.reference,
        digest: pushed.digest,
        pushed_at: pushed.pushed_at,
    })
}
