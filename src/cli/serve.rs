// src/cli/serve.rs
// Server initialization and the two transports (stdio, streamable HTTP).

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use containerkit::config::EnvConfig;
use containerkit::db::DatabasePool;
use containerkit::drivers::{Drivers, analyzer, docker, kube, scanner};
use containerkit::http::create_shared_client;
use containerkit::logbuf::LogBuffer;
use containerkit::mcp::KitServer;
use containerkit::policy::PolicyEngine;
use containerkit::session::SessionStore;
use containerkit::workspace::WorkspaceManager;

/// Shared server components. The sweeper handle must stay alive for the
/// background TTL/lock sweeps to keep running.
pub struct ServerParts {
    pub server: KitServer,
    pub sweeper: watch::Sender<bool>,
}

/// Initialize configuration, the session store, policy packs, and drivers.
/// A bad policy pack or an unopenable store is a fatal initialization error.
pub async fn init_parts(env: EnvConfig, logs: Arc<LogBuffer>) -> Result<ServerParts> {
    let validation = env.validate();
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    env.log_status();

    let policy = Arc::new(
        PolicyEngine::load_dir(&env.policy_dir).context("failed to load policy packs")?,
    );
    info!("{} policy rule(s) loaded", policy.rule_count());

    let pool = Arc::new(
        DatabasePool::open(&env.db_path())
            .await
            .context("failed to open the session store")?,
    );
    let workspaces = Arc::new(WorkspaceManager::new(env.workspace_root.clone()));
    std::fs::create_dir_all(workspaces.root()).context("failed to create the workspace root")?;
    let store = Arc::new(SessionStore::new(pool, workspaces, env.session_ttl_secs));
    let sweeper = store.spawn_sweeper();

    let http_client = create_shared_client();
    let analyzer: Arc<dyn containerkit::drivers::Analyzer> =
        match analyzer::LlmAnalyzer::from_config(&env.analyzer, http_client) {
            Some(llm) => {
                info!("analyzer endpoint configured");
                Arc::new(llm)
            }
            None => {
                info!("analyzer not configured - fix loop uses heuristic rules");
                Arc::new(analyzer::RuleAnalyzer)
            }
        };

    let drivers = Drivers {
        docker: Arc::new(
            docker::BollardDriver::connect(env.docker_socket.as_deref(), env.registry.clone())
                .context("docker driver initialization failed")?,
        ),
        cluster: Arc::new(kube::KubectlDriver::new(env.kubectl_bin.clone())),
        scanner: Arc::new(scanner::TrivyScanner::new(env.trivy_bin.clone())),
        analyzer,
    };

    let server = KitServer::new(store, drivers, policy, logs, Arc::new(env));
    Ok(ServerParts { server, sweeper })
}

/// Run the MCP server over line-delimited stdio.
pub async fn run_stdio(env: EnvConfig, logs: Arc<LogBuffer>) -> Result<()> {
    let parts = init_parts(env, logs).await?;
    info!("containerkit MCP server starting (stdio)");

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(parts.server, transport).await?;
    service.waiting().await?;

    let _ = parts.sweeper.send(true);
    Ok(())
}

/// Run the MCP server over streamable HTTP (POST for requests, SSE for
/// notifications) mounted at /mcp.
pub async fn run_http(addr: &str, env: EnvConfig, logs: Arc<LogBuffer>) -> Result<()> {
    let parts = init_parts(env, logs).await?;
    let server = parts.server;

    let ct = CancellationToken::new();
    let config = StreamableHttpServerConfig {
        sse_keep_alive: Some(std::time::Duration::from_secs(15)),
        sse_retry: Some(std::time::Duration::from_secs(3)),
        stateful_mode: true,
        cancellation_token: ct.clone(),
    };
    let session_manager = Arc::new(LocalSessionManager::default());
    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        session_manager,
        config,
    );

    let router = axum::Router::new().nest_service("/mcp", mcp_service);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("containerkit MCP server listening on http://{addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining in-flight requests");
            ct.cancel();
        })
        .await?;

    let _ = parts.sweeper.send(true);
    Ok(())
}
