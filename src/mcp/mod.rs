// src/mcp/mod.rs
// MCP server state and request lifecycle.

pub mod handlers;
pub mod progress;
pub mod requests;
pub mod responses;
mod router;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rmcp::{
    ErrorData, ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext},
    model::{
        CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
};
use tokio_util::sync::CancellationToken;

use crate::config::EnvConfig;
use crate::drivers::Drivers;
use crate::error::KitError;
use crate::logbuf::LogBuffer;
use crate::policy::PolicyEngine;
use crate::session::SessionStore;
use crate::tools::ToolContext;
use crate::utils::short_id;

use progress::ProgressEmitter;
use responses::error_call_result;

/// MCP server state. Cloned per HTTP session; all fields are shared
/// process-wide singletons.
#[derive(Clone)]
pub struct KitServer {
    pub store: Arc<SessionStore>,
    pub drivers: Drivers,
    pub policy: Arc<PolicyEngine>,
    pub logs: Arc<LogBuffer>,
    pub env: Arc<EnvConfig>,
    tool_router: ToolRouter<Self>,
}

impl KitServer {
    pub fn new(
        store: Arc<SessionStore>,
        drivers: Drivers,
        policy: Arc<PolicyEngine>,
        logs: Arc<LogBuffer>,
        env: Arc<EnvConfig>,
    ) -> Self {
        Self {
            store,
            drivers,
            policy,
            logs,
            env,
            tool_router: Self::create_tool_router(),
        }
    }

    /// Per-request view implementing ToolContext: shared singletons plus the
    /// request's cancellation token and progress channel.
    pub(crate) fn request_scope(&self, context: &RequestContext<RoleServer>) -> RequestScope<'_> {
        RequestScope {
            server: self,
            cancel: context.ct.clone(),
            progress: ProgressEmitter::new(
                context.peer.clone(),
                context.meta.get_progress_token(),
            ),
        }
    }
}

/// ToolContext implementation scoped to one request.
pub struct RequestScope<'s> {
    server: &'s KitServer,
    cancel: CancellationToken,
    progress: ProgressEmitter,
}

#[async_trait::async_trait]
impl ToolContext for RequestScope<'_> {
    fn store(&self) -> &Arc<SessionStore> {
        &self.server.store
    }

    fn drivers(&self) -> &Drivers {
        &self.server.drivers
    }

    fn policy(&self) -> &Arc<PolicyEngine> {
        &self.server.policy
    }

    fn logs(&self) -> &Arc<LogBuffer> {
        &self.server.logs
    }

    fn env(&self) -> &EnvConfig {
        &self.server.env
    }

    fn cancel(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn emit_progress(&self, step: &str, progress: &str, message: &str) {
        tracing::info!(step, progress, "{}", message);
        self.progress.emit(step, progress, message).await;
    }
}

impl ServerHandler for KitServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "containerkit".into(),
                title: Some("Container Kit - AI-assisted containerization pipeline".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Container Kit drives a repository through analyze, dockerfile, build, scan, \
                 tag, push, manifest, cluster, deploy and verify - step by step or in one \
                 containerize_and_deploy workflow. Every tool takes a session_id; results \
                 accumulate in the session for downstream steps."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let tool_name = request.name.to_string();
            let start = std::time::Instant::now();

            // Unknown tool: no side effects, stable error code.
            if !self.tool_router.list_all().iter().any(|t| t.name == request.name) {
                let err = KitError::validation(format!("unknown tool '{tool_name}'"))
                    .with_code(crate::error::codes::TOOL_NOT_FOUND)
                    .with_context("tool", &tool_name);
                return Ok(error_call_result(&err));
            }

            let session_id = request
                .arguments
                .as_ref()
                .and_then(|args| args.get("session_id"))
                .and_then(|v| v.as_str())
                .map(String::from);
            let args_json = request
                .arguments
                .as_ref()
                .map(|a| serde_json::to_string(a).unwrap_or_default())
                .unwrap_or_default();

            // Every invocation carries a deadline; exceeding it is a
            // TIMEOUT-category error, not a hung request.
            let deadline = Duration::from_secs(self.env.tool_timeout_secs);
            let ctx = ToolCallContext::new(self, request, context);
            let call = AssertUnwindSafe(self.tool_router.call(ctx)).catch_unwind();

            let result = match tokio::time::timeout(deadline, call).await {
                Err(_) => Ok(error_call_result(
                    &KitError::timeout(format!(
                        "tool '{tool_name}' exceeded its {}s deadline",
                        self.env.tool_timeout_secs
                    ))
                    .with_context("tool", &tool_name),
                )),
                Ok(Err(_panic)) => {
                    // A panic is a programmer error; hand the caller a trace
                    // id instead of the payload.
                    let trace_id = short_id();
                    tracing::error!(trace_id = %trace_id, tool = %tool_name, "tool panicked");
                    Ok(error_call_result(&KitError::system(format!(
                        "tool '{tool_name}' panicked"
                    ))))
                }
                Ok(Ok(result)) => result,
            };

            // Persist tool history (fire-and-forget, never blocks the response).
            if let Some(sid) = session_id {
                let success = match &result {
                    Ok(r) => !r.is_error.unwrap_or(false),
                    Err(_) => false,
                };
                let store = self.store.clone();
                let duration_ms = start.elapsed().as_millis() as u64;
                tokio::spawn(async move {
                    store
                        .log_tool_call(&sid, &tool_name, &args_json, success, duration_ms)
                        .await;
                });
            }

            result
        }
    }
}
