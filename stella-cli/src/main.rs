//! Stella CLI
//!
//! Runs a Stella virtual switch node from a JSON configuration file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stella_node::{Node, NodeConfig};
use stella_protocol::Identity;

/// Stella - a virtual Ethernet switch over UDP
#[derive(Parser)]
#[command(name = "stella")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file; defaults when omitted
    #[arg(short, long, default_value = "")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace); overrides the
    /// configured level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted
    Run,

    /// Generate a fresh identity and print it
    GenIdentity,

    /// Write a default configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "stella.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = NodeConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.as_filter().to_string());
    init_logging(&level);

    match cli.command {
        Commands::Run => run_node(config).await,
        Commands::GenIdentity => gen_identity(),
        Commands::GenConfig { output } => gen_config(config, output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_node(config: NodeConfig) -> Result<()> {
    let node = Node::new(config).context("failed to create node")?;
    info!(address = %node.address(), "node identity loaded");

    node.start().await.context("failed to start node")?;

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    if let Err(e) = node.stop().await {
        error!(error = %e, "graceful stop failed, forcing");
        node.force_stop().await;
    }

    Ok(())
}

fn gen_identity() -> Result<()> {
    let identity = Identity::generate();
    println!("{}", identity.serialize());
    Ok(())
}

fn gen_config(config: NodeConfig, output: PathBuf) -> Result<()> {
    config
        .save(&output)
        .with_context(|| format!("failed to write {output:?}"))?;
    println!("wrote {}", output.display());
    Ok(())
}
