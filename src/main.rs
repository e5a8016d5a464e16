// src/main.rs
// containerkit - AI-assisted containerization pipeline over MCP

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::LevelFilter, fmt};

use containerkit::config::EnvConfig;
use containerkit::logbuf::{LogBuffer, RingBufferLayer};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.containerkit/.env only (never from CWD - an analyzed
    // repository must not be able to override credentials).
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".containerkit/.env"));
    }

    let cli = Cli::parse();
    let env = EnvConfig::load();

    // The ring buffer captures everything the `get_logs` tool can serve;
    // stderr stays quiet on the stdio transport so it never pollutes the
    // protocol stream's neighbor.
    let logs = Arc::new(LogBuffer::new(env.log_capacity));
    let stderr_level = match &cli.command {
        None | Some(Commands::Serve { http: None }) => Level::WARN,
        Some(Commands::Serve { http: Some(_) }) => Level::INFO,
        Some(Commands::Tool { .. }) => Level::WARN,
    };
    tracing_subscriber::registry()
        .with(RingBufferLayer::new(logs.clone()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(LevelFilter::from_level(stderr_level)),
        )
        .init();

    match cli.command {
        None | Some(Commands::Serve { http: None }) => {
            cli::serve::run_stdio(env, logs).await?;
        }
        Some(Commands::Serve { http: Some(addr) }) => {
            cli::serve::run_http(&addr, env, logs).await?;
        }
        Some(Commands::Tool { name, args }) => {
            cli::tool::run_tool(name, args, env, logs).await?;
        }
    }

    Ok(())
}
