use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tapsign_session::FlowConfig;
use tracing::info;

mod scenarios;

use scenarios::Rig;

#[derive(Parser)]
#[command(version, about = "Run tap-to-sign flows against mock tokens")]
struct Cli {
    /// JSON flow configuration (defaults apply to missing fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a wallet from a token that needs no secret
    Export {
        /// Wallet to export
        #[arg(long, default_value = "vault")]
        wallet: String,
    },

    /// Sign a transaction, typing the secret before the tap
    Sign {
        /// Secret to submit
        #[arg(long, default_value = tapsign_session::mock::MOCK_SECRET)]
        secret: String,

        /// Opaque transaction payload
        #[arg(long, default_value = "cHNidP8BAHECAAAAAQ")]
        payload: String,
    },

    /// Type wrong secrets until the flow locks out
    Lockout {
        /// Wrong secret to submit
        #[arg(long, default_value = "000000")]
        secret: String,
    },

    /// Export a wallet over a poll/feed token
    Portal {
        /// Wallet to export
        #[arg(long, default_value = "vault")]
        wallet: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FlowConfig::default(),
    };
    info!(?config, "Flow configuration loaded");

    match cli.command {
        Commands::Export { wallet } => scenarios::export(Rig::new(config)?, &wallet).await,
        Commands::Sign { secret, payload } => {
            scenarios::sign(Rig::new(config)?, &secret, payload).await
        }
        Commands::Lockout { secret } => scenarios::lockout(Rig::new(config)?, &secret).await,
        Commands::Portal { wallet } => scenarios::export(Rig::portal(config)?, &wallet).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<FlowConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    FlowConfig::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
