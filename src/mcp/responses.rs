//! Structured output types for MCP tools.
//!
//! Each tool returns a wrapper struct with a human-readable `message` plus
//! typed data. Using `Json<T>` return values, rmcp infers `outputSchema`
//! for each tool; the root type is always an object (MCP requirement).
//! Errors never appear here: a failed call returns `is_error=true` with the
//! structured error payload as its content.

use std::borrow::Cow;

use rmcp::ErrorData;
use rmcp::handler::server::tool::IntoCallToolResult;
use rmcp::model::{CallToolResult, Content};
use schemars::JsonSchema;
use serde::Serialize;

use crate::detect::RepoFacts;
use crate::drivers::ClusterInfo;
use crate::error::KitError;
use crate::logbuf::LogEntry;
use crate::orchestrator::WorkflowReport;
use crate::session::WorkflowStatus;
use crate::tools::build::BuildResult;
use crate::tools::deploy::DeployResult;
use crate::tools::dockerfile::DockerfileResult;
use crate::tools::manifest::ManifestResult;
use crate::tools::push::PushResult;
use crate::tools::scan::ScanResult;
use crate::tools::sessions::SessionSummary;
use crate::tools::tag::TagResult;
use crate::tools::verify::VerifyResult;
use crate::utils::short_id;

/// Trait for outputs that expose a human-readable message.
pub trait HasMessage {
    fn message(&self) -> &str;
}

macro_rules! has_message {
    ($($ty:ty),+ $(,)?) => {
        $(impl HasMessage for $ty {
            fn message(&self) -> &str {
                &self.message
            }
        })+
    };
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct AnalyzeOutput {
    pub message: String,
    pub facts: RepoFacts,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DockerfileOutput {
    pub message: String,
    pub dockerfile: DockerfileResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct BuildOutput {
    pub message: String,
    pub build: BuildResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ScanOutput {
    pub message: String,
    pub scan: ScanResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TagOutput {
    pub message: String,
    pub tag: TagResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PushOutput {
    pub message: String,
    pub push: PushResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ManifestOutput {
    pub message: String,
    pub manifest: ManifestResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ClusterOutput {
    pub message: String,
    pub cluster: ClusterInfo,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DeployOutput {
    pub message: String,
    pub deploy: DeployResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct VerifyOutput {
    pub message: String,
    pub verify: VerifyResult,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct WorkflowOutput {
    pub message: String,
    pub workflow: WorkflowReport,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SessionListOutput {
    pub message: String,
    pub total: usize,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct DeleteSessionOutput {
    pub message: String,
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LogsOutput {
    pub message: String,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CancelWorkflowOutput {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<WorkflowStatus>,
}

has_message!(
    AnalyzeOutput,
    DockerfileOutput,
    BuildOutput,
    ScanOutput,
    TagOutput,
    PushOutput,
    ManifestOutput,
    ClusterOutput,
    DeployOutput,
    VerifyOutput,
    WorkflowOutput,
    SessionListOutput,
    DeleteSessionOutput,
    LogsOutput,
    CancelWorkflowOutput,
);

/// JSON wrapper that preserves the human-readable `message` in MCP content
/// while carrying the full struct as structured content.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T: JsonSchema> JsonSchema for Json<T> {
    fn schema_name() -> Cow<'static, str> {
        T::schema_name()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        T::json_schema(generator)
    }
}

impl<T: Serialize + JsonSchema + HasMessage + 'static> IntoCallToolResult for Json<T> {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        let message = self.0.message().to_string();
        let value = serde_json::to_value(&self.0).map_err(|e| {
            ErrorData::internal_error(format!("failed to serialize structured content: {e}"), None)
        })?;

        Ok(CallToolResult {
            content: vec![Content::text(message)],
            structured_content: Some(value),
            is_error: Some(false),
            meta: None,
        })
    }
}

/// Render a KitError as an `is_error=true` CallToolResult carrying the
/// structured payload - a tool failure is data, not a protocol fault.
pub fn error_call_result(err: &KitError) -> CallToolResult {
    let trace_id = short_id();
    if !err.user_facing() {
        tracing::error!(trace_id = %trace_id, "tool failed: {:#?}", err);
    }
    let payload = serde_json::json!({
        "success": false,
        "error": err.to_wire(),
        "trace_id": trace_id,
    });
    CallToolResult {
        content: vec![Content::text(err.to_user_string(&trace_id))],
        structured_content: Some(payload),
        is_error: Some(true),
        meta: None,
    }
}

/// Convert a tool outcome into a CallToolResult.
pub fn tool_result<T>(result: Result<Json<T>, KitError>) -> Result<CallToolResult, ErrorData>
where
    T: Serialize + JsonSchema + HasMessage + 'static,
{
    match result {
        Ok(json) => json.into_call_tool_result(),
        Err(err) => Ok(error_call_result(&err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::handler::server::tool::schema_for_output;

    #[test]
    fn all_schemas_are_valid_mcp_output() {
        // Each output type must produce a root type "object" schema.
        assert!(schema_for_output::<AnalyzeOutput>().is_ok(), "AnalyzeOutput");
        assert!(schema_for_output::<DockerfileOutput>().is_ok(), "DockerfileOutput");
        assert!(schema_for_output::<BuildOutput>().is_ok(), "BuildOutput");
        assert!(schema_for_output::<ScanOutput>().is_ok(), "ScanOutput");
        assert!(schema_for_output::<TagOutput>().is_ok(), "TagOutput");
        assert!(schema_for_output::<PushOutput>().is_ok(), "PushOutput");
        assert!(schema_for_output::<ManifestOutput>().is_ok(), "ManifestOutput");
        assert!(schema_for_output::<ClusterOutput>().is_ok(), "ClusterOutput");
        assert!(schema_for_output::<DeployOutput>().is_ok(), "DeployOutput");
        assert!(schema_for_output::<VerifyOutput>().is_ok(), "VerifyOutput");
        assert!(schema_for_output::<WorkflowOutput>().is_ok(), "WorkflowOutput");
        assert!(schema_for_output::<SessionListOutput>().is_ok(), "SessionListOutput");
        assert!(schema_for_output::<LogsOutput>().is_ok(), "LogsOutput");
    }

    #[test]
    fn tool_error_becomes_is_error_result() {
        let result: Result<CallToolResult, ErrorData> = tool_result::<BuildOutput>(Err(
            KitError::validation("bad image reference"),
        ));
        let call_result = result.expect("not a protocol error");
        assert_eq!(call_result.is_error, Some(true));
        let structured = call_result.structured_content.expect("structured");
        assert_eq!(structured["success"], serde_json::json!(false));
        assert_eq!(structured["error"]["code"], serde_json::json!("INVALID_INPUT"));
    }
}
