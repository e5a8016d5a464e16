//! Tool implementations.
//!
//! Every tool is an async function over a `ToolContext` plus a typed
//! parameter struct. Tools are stateless: all cross-step state lives in the
//! session, and each tool's output is recorded under
//! `session.results[tool_name]` by whoever drives it (the MCP router for
//! stand-alone calls, the orchestrator inside a workflow).

pub mod analyze;
pub mod build;
pub mod cluster;
pub mod deploy;
pub mod dockerfile;
pub mod logs;
pub mod manifest;
pub mod push;
pub mod scan;
pub mod sessions;
pub mod tag;
pub mod verify;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::EnvConfig;
use crate::drivers::Drivers;
use crate::error::{KitError, Result};
use crate::logbuf::LogBuffer;
use crate::policy::PolicyEngine;
use crate::session::{Session, SessionStore};
use crate::workspace::Workspace;

/// Common context required by all tools. Implemented by the MCP server's
/// per-request scope and by the test harness.
#[async_trait]
pub trait ToolContext: Send + Sync {
    fn store(&self) -> &Arc<SessionStore>;
    fn drivers(&self) -> &Drivers;
    fn policy(&self) -> &Arc<PolicyEngine>;
    fn logs(&self) -> &Arc<LogBuffer>;
    fn env(&self) -> &EnvConfig;

    /// Per-request cancellation token. The default is a token that never
    /// fires (CLI one-shot invocations).
    fn cancel(&self) -> CancellationToken {
        CancellationToken::new()
    }

    /// Emit a progress notification for the active request. Progress is
    /// also always recorded in the session's workflow state; this is the
    /// live channel.
    async fn emit_progress(&self, step: &str, progress: &str, message: &str) {
        tracing::info!(step, progress, "{}", message);
    }
}

/// Read a required upstream result, failing with MISSING_DEPENDENCY.
pub fn require_result<T: serde::de::DeserializeOwned>(
    session: &Session,
    tool: &str,
    needs: &str,
) -> Result<T> {
    let value = session
        .result(needs)
        .ok_or_else(|| KitError::missing_dependency(tool, needs))?;
    serde_json::from_value(value.clone()).map_err(|e| {
        KitError::store(format!(
            "stored result for '{needs}' does not deserialize: {e}"
        ))
    })
}

/// Open the workspace for a session, creating it if needed.
pub fn workspace_for(ctx: &impl ToolContext, session: &Session) -> Result<Workspace> {
    ctx.store().workspaces().ensure(&session.id)
}

/// Run a tool body under the session workflow lock and record its result.
/// This is the stand-alone dispatch path; the orchestrator holds the lock
/// itself and records results step-by-step instead.
pub async fn locked_call<C, F, Fut, T>(
    ctx: &C,
    session_id: &str,
    tool: &str,
    body: F,
) -> Result<T>
where
    C: ToolContext,
    F: FnOnce(Session) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    T: serde::Serialize,
{
    let _guard = ctx.store().locks().acquire(session_id).await;
    let session = ctx.store().get_or_create(session_id).await?;
    let result = body(session).await?;
    ctx.store()
        .record_result(session_id, tool, serde_json::to_value(&result)?)
        .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn require_result_missing_is_dependency_error() {
        let session = Session::new("s-1", PathBuf::from("/ws/s-1"), None);
        let err = require_result::<serde_json::Value>(&session, "build", "dockerfile")
            .expect_err("missing");
        assert_eq!(err.code, crate::error::codes::MISSING_DEPENDENCY);
        assert_eq!(err.context.get("requires").map(String::as_str), Some("dockerfile"));
    }

    #[test]
    fn require_result_returns_typed_value() {
        let mut session = Session::new("s-1", PathBuf::from("/ws/s-1"), None);
        session
            .results
            .insert("analyze".into(), serde_json::json!({"language": "go"}));
        let facts: crate::detect::RepoFacts =
            require_result(&session, "dockerfile", "analyze").expect("typed");
        assert_eq!(facts.language, "go");
    }
}
