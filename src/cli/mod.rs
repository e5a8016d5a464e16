// src/cli/mod.rs
// Command-line interface

pub mod serve;
pub mod tool;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "containerkit", version, about = "AI-assisted containerization pipeline over MCP")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server (stdio by default)
    Serve {
        /// Serve MCP over HTTP at this address instead of stdio, e.g. 127.0.0.1:8591
        #[arg(long)]
        http: Option<String>,
    },
    /// Invoke a single tool with a JSON argument object
    Tool {
        /// Tool name, e.g. analyze
        name: String,
        /// JSON arguments, e.g. '{"session_id": "s-1", "repo_path": "."}'
        args: Option<String>,
    },
}
