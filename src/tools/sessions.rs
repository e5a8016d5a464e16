// src/tools/sessions.rs
// Session management tools: list_sessions and delete_session.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::WorkflowStatus;
use crate::utils::path_to_string;

use super::ToolContext;

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SessionSummary {
    pub id: String,
    pub workspace_path: String,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    /// Tools that have recorded a result, in name order.
    pub completed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<WorkflowStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

pub struct ListSessionsParams {
    pub limit: usize,
    /// Keep only sessions carrying this "key=value" label.
    pub label: Option<String>,
}

impl Default for ListSessionsParams {
    fn default() -> Self {
        Self {
            limit: 50,
            label: None,
        }
    }
}

pub async fn list(
    ctx: &impl ToolContext,
    params: &ListSessionsParams,
) -> Result<Vec<SessionSummary>> {
    let sessions = ctx.store().list(params.limit).await?;

    let label_filter = params
        .label
        .as_deref()
        .and_then(|pair| pair.split_once('='));

    Ok(sessions
        .into_iter()
        .filter(|session| match label_filter {
            Some((key, value)) => session.labels.get(key).map(String::as_str) == Some(value),
            None => true,
        })
        .map(|session| SessionSummary {
            workspace_path: path_to_string(&session.workspace_path),
            version: session.version,
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
            labels: session.labels.clone(),
            completed_tools: session.results.keys().cloned().collect(),
            workflow_status: session.workflow.as_ref().map(|wf| wf.status),
            expires_at: session.expires_at().map(|t| t.to_rfc3339()),
            id: session.id,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeleteSessionResult {
    pub id: String,
    pub deleted: bool,
}

/// Delete a session under its workflow lock so an in-flight workflow
/// finishes its critical section first.
pub async fn delete(ctx: &impl ToolContext, session_id: &str) -> Result<DeleteSessionResult> {
    let _guard = ctx.store().locks().acquire(session_id).await;
    let deleted = ctx.store().delete(session_id).await?;
    Ok(DeleteSessionResult {
        id: session_id.to_string(),
        deleted,
    })
}
