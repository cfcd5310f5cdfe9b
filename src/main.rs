//! # AutoPilot
//!
//! Control loop for autonomous marketing campaigns.
//!
//! Usage:
//!   autopilot serve                  # Gateway + in-process scheduler
//!   autopilot serve --port 8080      # Custom port
//!   autopilot tick                   # Run one scheduler pass and exit
//!   autopilot init                   # Write a default config file
//!   autopilot stats --campaign <id>  # Deliverability stats for a campaign

use std::path::PathBuf;

use anyhow::{Context, Result};
use autopilot_core::config::AutopilotConfig;
use autopilot_db::Store;
use autopilot_gateway::DeliverabilityMonitor;
use autopilot_scheduler::{HttpWorkflowDispatcher, run_pass};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autopilot", version, about = "🚀 AutoPilot: campaign scheduler and dispatch gateway")]
struct Cli {
    /// Config file (default: ~/.autopilot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Override gateway.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one scheduler pass and print the summary
    Tick,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print rolling deliverability stats for a campaign
    Stats {
        #[arg(long)]
        campaign: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AutopilotConfig> {
    let config = match path {
        Some(p) => AutopilotConfig::load_from(p).with_context(|| format!("loading {}", p.display()))?,
        None => AutopilotConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "autopilot=debug,autopilot_gateway=debug,autopilot_scheduler=debug,tower_http=debug"
    } else {
        "autopilot=info,autopilot_gateway=info,autopilot_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.command {
        Command::Init { force } => {
            let path = cli.config.unwrap_or_else(AutopilotConfig::default_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            AutopilotConfig::default().save_to(&path)?;
            println!("✅ Wrote default config to {}", path.display());
        }
        Command::Serve { port } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(port) = port {
                config.gateway.port = port;
            }
            autopilot_gateway::start(config).await?;
        }
        Command::Tick => {
            let config = load_config(cli.config.as_ref())?;
            let store = Store::open(&config.database_path())?;
            let dispatcher = HttpWorkflowDispatcher::new(&config.workflow)?;
            let summary = run_pass(&store, &dispatcher, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Stats { campaign } => {
            let config = load_config(cli.config.as_ref())?;
            let store = Store::open(&config.database_path())?;
            let found = store
                .get_campaign(&campaign)?
                .with_context(|| format!("campaign {campaign} not found"))?;
            let monitor = DeliverabilityMonitor::new(&config.deliverability);
            let health = monitor.health(&store, &found.user_id, &found.id, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }
    Ok(())
}
