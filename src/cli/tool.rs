// src/cli/tool.rs
// One-shot tool invocation from the command line. Shares the MCP handlers
// so CLI and server dispatch never drift apart.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use containerkit::config::EnvConfig;
use containerkit::drivers::Drivers;
use containerkit::logbuf::LogBuffer;
use containerkit::mcp::handlers;
use containerkit::mcp::responses::{HasMessage, Json};
use containerkit::policy::PolicyEngine;
use containerkit::session::SessionStore;
use containerkit::tools::ToolContext;

use super::serve::init_parts;

/// ToolContext for CLI invocations: shared singletons, no cancellation
/// source, progress printed through tracing only.
struct CliContext {
    server: containerkit::mcp::KitServer,
}

#[async_trait]
impl ToolContext for CliContext {
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
}

fn parse<T: serde::de::DeserializeOwned>(args: &Option<String>) -> Result<T> {
    let raw = args.as_deref().unwrap_or("{}");
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("invalid tool arguments: {e}"))
}

fn print_output<T: serde::Serialize + HasMessage>(output: Json<T>) -> Result<()> {
    eprintln!("{}", output.0.message());
    println!("{}", serde_json::to_string_pretty(&output.0)?);
    Ok(())
}

pub async fn run_tool(
    name: String,
    args: Option<String>,
    env: EnvConfig,
    logs: Arc<LogBuffer>,
) -> Result<()> {
    let parts = init_parts(env, logs).await?;
    let ctx = CliContext {
        server: parts.server,
    };

    match name.as_str() {
        "analyze" => print_output(handlers::analyze_handler(&ctx, parse(&args)?).await?),
        "dockerfile" => print_output(handlers::dockerfile_handler(&ctx, parse(&args)?).await?),
        "build" => print_output(handlers::build_handler(&ctx, parse(&args)?).await?),
        "scan" => print_output(handlers::scan_handler(&ctx, parse(&args)?).await?),
        "tag" => print_output(handlers::tag_handler(&ctx, parse(&args)?).await?),
        "push" => print_output(handlers::push_handler(&ctx, parse(&args)?).await?),
        "manifest" => print_output(handlers::manifest_handler(&ctx, parse(&args)?).await?),
        "cluster" => print_output(handlers::cluster_handler(&ctx, parse(&args)?).await?),
        "deploy" => print_output(handlers::deploy_handler(&ctx, parse(&args)?).await?),
        "verify" => print_output(handlers::verify_handler(&ctx, parse(&args)?).await?),
        "containerize_and_deploy" => {
            print_output(handlers::workflow_handler(&ctx, parse(&args)?).await?)
        }
        "cancel_workflow" => print_output(handlers::cancel_handler(&ctx, parse(&args)?).await?),
        "list_sessions" => print_output(handlers::list_sessions_handler(&ctx, parse(&args)?).await?),
        "delete_session" => {
            print_output(handlers::delete_session_handler(&ctx, parse(&args)?).await?)
        }
        "get_logs" => print_output(handlers::logs_handler(&ctx, parse(&args)?).await?),
        other => bail!(
            "unknown tool '{other}'; available: analyze, dockerfile, build, scan, tag, push, \
             manifest, cluster, deploy, verify, containerize_and_deploy, cancel_workflow, \
             list_sessions, delete_session, get_logs"
        ),
    }
}
