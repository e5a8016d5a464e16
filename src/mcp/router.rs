// src/mcp/router.rs
// MCP tool router - #[tool] annotated methods and per-tool handlers.
//
// Order of operations per call: schema validation (rmcp Parameters), policy
// evaluation over the validated input, then the tool body under the session
// workflow lock. A schema-invalid input therefore never reaches policy, and
// a policy-blocked input never reaches the tool body.

use rmcp::{
    ErrorData,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::CallToolResult,
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use serde::Serialize;

use super::KitServer;
use super::handlers::*;
use super::requests::*;
use super::responses::{error_call_result, tool_result};

impl KitServer {
    /// Expose the macro-generated tool_router() to the parent module.
    pub(super) fn create_tool_router() -> ToolRouter<Self> {
        Self::tool_router()
    }

    /// Evaluate policy over a validated input. A block aborts with the rule
    /// id; warnings and suggestions are logged and surfaced through the
    /// generating tools' own outputs.
    fn policy_gate<T: Serialize>(&self, tool: &str, req: &T) -> Option<CallToolResult> {
        let value = serde_json::to_value(req).unwrap_or_default();
        let context = crate::policy::flatten_input(tool, &value);
        let verdict = self.policy.evaluate(&context);
        for note in &verdict.warnings {
            tracing::warn!(rule = %note.rule_id, tool, "policy warning: {}", note.message);
        }
        verdict.into_block_error().map(|err| error_call_result(&err))
    }
}

#[tool_router]
impl KitServer {
    #[tool(
        description = "Analyze a repository: detect language, framework, build system, entry points, ports and databases. First step of the pipeline."
    )]
    async fn analyze(
        &self,
        Parameters(req): Parameters<AnalyzeRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("analyze", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(analyze_handler(&scope, req).await)
    }

    #[tool(
        description = "Generate a Dockerfile into the session workspace from the analyze result. Requires: analyze."
    )]
    async fn dockerfile(
        &self,
        Parameters(req): Parameters<DockerfileRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("dockerfile", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(dockerfile_handler(&scope, req).await)
    }

    #[tool(description = "Build the container image from the workspace Dockerfile. Requires: dockerfile.")]
    async fn build(
        &self,
        Parameters(req): Parameters<BuildRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("build", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(build_handler(&scope, req).await)
    }

    #[tool(description = "Scan the built image for vulnerabilities. Requires: build.")]
    async fn scan(
        &self,
        Parameters(req): Parameters<ScanRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("scan", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(scan_handler(&scope, req).await)
    }

    #[tool(description = "Apply target references to the built image. Requires: build.")]
    async fn tag(
        &self,
        Parameters(req): Parameters<TagRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("tag", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(tag_handler(&scope, req).await)
    }

    #[tool(description = "Push a tagged reference to its registry. Requires: tag (or build for an implicit tag).")]
    async fn push(
        &self,
        Parameters(req): Parameters<PushRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("push", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(push_handler(&scope, req).await)
    }

    #[tool(
        description = "Generate Kubernetes manifests (Deployment, Service, optional Ingress) into the workspace. Requires: analyze, push."
    )]
    async fn manifest(
        &self,
        Parameters(req): Parameters<ManifestRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("manifest", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(manifest_handler(&scope, req).await)
    }

    #[tool(description = "Ensure a cluster is reachable, optionally provisioning a local dev cluster.")]
    async fn cluster(
        &self,
        Parameters(req): Parameters<ClusterRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("cluster", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(cluster_handler(&scope, req).await)
    }

    #[tool(description = "Apply the generated manifests to the cluster. Requires: manifest, cluster.")]
    async fn deploy(
        &self,
        Parameters(req): Parameters<DeployRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("deploy", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(deploy_handler(&scope, req).await)
    }

    #[tool(description = "Poll pod readiness until healthy or deadline. Requires: deploy.")]
    async fn verify(
        &self,
        Parameters(req): Parameters<VerifyRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("verify", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(verify_handler(&scope, req).await)
    }

    #[tool(
        description = "Run the full containerize-and-deploy pipeline: analyze, dockerfile, build, scan, tag, push, manifest, cluster, deploy, verify. Failed steps go through the fix loop; completed steps are compensated on failure when saga is enabled."
    )]
    async fn containerize_and_deploy(
        &self,
        Parameters(req): Parameters<WorkflowRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("containerize_and_deploy", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(workflow_handler(&scope, req).await)
    }

    #[tool(description = "Request cancellation of the session's running workflow.")]
    async fn cancel_workflow(
        &self,
        Parameters(req): Parameters<CancelWorkflowRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("cancel_workflow", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(cancel_handler(&scope, req).await)
    }

    #[tool(description = "List sessions with their completed tools and workflow status.")]
    async fn list_sessions(
        &self,
        Parameters(req): Parameters<ListSessionsRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("list_sessions", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(list_sessions_handler(&scope, req).await)
    }

    #[tool(description = "Delete a session and its workspace.")]
    async fn delete_session(
        &self,
        Parameters(req): Parameters<DeleteSessionRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("delete_session", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(delete_session_handler(&scope, req).await)
    }

    #[tool(description = "Read server logs from the in-memory ring buffer with level/time/substring filters.")]
    async fn get_logs(
        &self,
        Parameters(req): Parameters<GetLogsRequest>,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        if let Some(blocked) = self.policy_gate("get_logs", &req) {
            return Ok(blocked);
        }
        let scope = self.request_scope(&context);
        tool_result(logs_handler(&scope, req).await)
    }
}

