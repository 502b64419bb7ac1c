//! Protect CLI
//!
//! A command-line tool for inspecting flagged containers, managing
//! detection strategies and checking the health of a protect agent.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{flags, status, strategies};
use std::path::PathBuf;

/// Protect CLI
#[derive(Parser)]
#[command(name = "protectctl")]
#[command(author, version, about = "CLI for the Protect abuse detection agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via PROTECT_API_URL env var)
    #[arg(long, env = "PROTECT_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and release flagged containers
    #[command(subcommand)]
    Flags(FlagsCommands),

    /// Manage detection strategies
    #[command(subcommand)]
    Strategies(StrategiesCommands),

    /// Show agent health and readiness
    Status,
}

#[derive(Subcommand)]
pub enum FlagsCommands {
    /// List flagged containers
    List {
        /// Show only suspended containers
        #[arg(long)]
        suspended: bool,
    },

    /// Show the flag history of a container
    Show {
        /// Container UUID
        uuid: String,
    },

    /// Clear a container's suspension after remediation
    Release {
        /// Container UUID
        uuid: String,
    },
}

#[derive(Subcommand)]
pub enum StrategiesCommands {
    /// List the agent's active strategies
    List,

    /// Reload strategies from the agent's strategy directory
    Reload,

    /// Validate a local strategy directory
    Validate {
        /// Directory containing .protect / .json strategy files
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            output::print_warning(&format!("Ignoring CLI config: {:#}", e));
            config::Config::default()
        }
    };
    let format = cli
        .format
        .or_else(|| config.default_format.as_deref().and_then(output::OutputFormat::parse))
        .unwrap_or_default();

    // Validation is local and needs no agent
    if let Commands::Strategies(StrategiesCommands::Validate { dir }) = &cli.command {
        return strategies::validate_strategies(dir, format);
    }

    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;

    match cli.command {
        Commands::Flags(flags_cmd) => match flags_cmd {
            FlagsCommands::List { suspended } => {
                flags::list_flags(&client, suspended, format).await?;
            }
            FlagsCommands::Show { uuid } => {
                flags::show_flag(&client, &uuid, format).await?;
            }
            FlagsCommands::Release { uuid } => {
                flags::release_flag(&client, &uuid, format).await?;
            }
        },
        Commands::Strategies(strategies_cmd) => match strategies_cmd {
            StrategiesCommands::List => {
                strategies::list_strategies(&client, format).await?;
            }
            StrategiesCommands::Reload => {
                strategies::reload_strategies(&client, format).await?;
            }
            StrategiesCommands::Validate { .. } => {}
        },
        Commands::Status => {
            status::show_status(&client, format).await?;
        }
    }

    Ok(())
}
