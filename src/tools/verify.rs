// src/tools/verify.rs
// Step 10: poll pod readiness until every replica is ready or the deadline
// passes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KitError, Result, codes};
use crate::session::Session;

use super::{ToolContext, require_result};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct VerifyResult {
    pub status: String,
    pub ready_pods: u32,
    pub total_pods: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub waited_ms: u64,
}

pub struct VerifyParams {
    pub timeout_secs: u64,
}

impl Default for VerifyParams {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

pub async fn execute(
    ctx: &impl ToolContext,
    session: &Session,
    params: &VerifyParams,
) -> Result<VerifyResult> {
    let deploy: super::deploy::DeployResult = require_result(session, "verify", "deploy")?;

    let cancel = ctx.cancel();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(params.timeout_secs);
    let started = std::time::Instant::now();
    let mut last = None;

    loop {
        if cancel.is_cancelled() {
            return Err(KitError::cancelled());
        }

        let status = ctx
            .drivers()
            .cluster
            .pod_status(&deploy.namespace, &deploy.selector)
            .await?;

        if status.total > 0 && status.ready == status.total {
            return Ok(VerifyResult {
                status: "healthy".to_string(),
                ready_pods: status.ready,
                total_pods: status.total,
                endpoint: status.endpoint,
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        last = Some(status);

        if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(KitError::cancelled()),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    let (ready, total) = last.map(|s| (s.ready, s.total)).unwrap_or((0, 0));
    Err(KitError::deploy(
        codes::VERIFY_UNHEALTHY,
        format!(
            "deployment did not become ready within {}s ({ready}/{total} pods ready)",
            params.timeout_secs
        ),
    )
    .with_context("namespace", &deploy.namespace)
    .with_context("selector", &deploy.selector)
    .with_suggestion("inspect pod events: kubectl describe pods -n <namespace>"))
}
