//! Eviction Agent CLI
//!
//! A command-line tool for inspecting a running node eviction agent:
//! pressure conditions, signal observations, and component health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, observations, pressure};

/// Eviction Agent CLI
#[derive(Parser)]
#[command(name = "evictctl")]
#[command(author, version, about = "CLI for the node eviction agent", long_about = None)]
pub struct Cli {
    /// Agent endpoint URL (can also be set via EVICT_AGENT_URL env var)
    #[arg(long, env = "EVICT_AGENT_URL", default_value = "http://localhost:8080")]
    pub agent_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the node's current pressure conditions
    Pressure,

    /// Show the last synchronized signal observations
    Observations,

    /// Show agent component health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::AgentClient::new(&cli.agent_url)?;

    // Execute command
    match cli.command {
        Commands::Pressure => {
            pressure::show_pressure(&client, cli.format).await?;
        }
        Commands::Observations => {
            observations::show_observations(&client, cli.format).await?;
        }
        Commands::Health => {
            health::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
