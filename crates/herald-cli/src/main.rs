//! The `herald` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use herald_types::Config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Herald -- bridge Claude Chat to Claude Code on your machine.
#[derive(Parser, Debug)]
#[command(name = "herald", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Herald server
    Serve {
        /// Path to the config file (overrides the search paths)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate configuration
    Check {
        /// Path to the config file (overrides the search paths)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check whether a local server is running
    Health {
        /// Server port
        #[arg(long, default_value_t = 8420)]
        port: u16,
    },

    /// Generate a new client secret (invalidates all sessions)
    RotateSecret {
        /// Path to the config file (its directory holds the secret)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => cmd_serve(config.as_deref()).await,
        Commands::Check { config } => cmd_check(config.as_deref()),
        Commands::Health { port } => cmd_health(port).await,
        Commands::RotateSecret { config } => cmd_rotate_secret(config.as_deref()),
        Commands::Version => {
            println!("herald {VERSION}");
            Ok(())
        }
    }
}

async fn cmd_serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut cfg = load_config(config_path).context("failed to load configuration")?;

    ensure_client_secret(&mut cfg, config_path).context("failed to load client secret")?;

    setup_logging(&cfg);

    herald_server::run(cfg, VERSION)
        .await
        .context("server error")?;
    Ok(())
}

fn cmd_check(config_path: Option<&Path>) -> anyhow::Result<()> {
    load_config(config_path)?;
    println!("configuration is valid");
    Ok(())
}

async fn cmd_health(port: u16) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .context("unhealthy")?;

    let response = client.get(&url).send().await.context("unhealthy")?;
    if !response.status().is_success() {
        bail!("unhealthy: status {}", response.status().as_u16());
    }

    println!("healthy");
    Ok(())
}

fn cmd_rotate_secret(config_path: Option<&Path>) -> anyhow::Result<()> {
    let dir = config_dir_from(config_path);
    // The secret itself is deliberately not printed.
    herald_auth::rotate_secret(&dir)?;
    println!("Secret rotated. Restart Herald to apply. All existing sessions will be invalidated.");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config, herald_types::HeraldError> {
    match path {
        Some(path) => herald_types::load_from_file(path),
        None => herald_types::load(),
    }
}

/// Client secret priority: `HERALD_CLIENT_SECRET` > config value >
/// generated secret file.
fn ensure_client_secret(
    cfg: &mut Config,
    config_path: Option<&Path>,
) -> Result<(), herald_types::HeraldError> {
    if let Ok(secret) = std::env::var("HERALD_CLIENT_SECRET") {
        if !secret.is_empty() {
            cfg.auth.client_secret = secret;
            return Ok(());
        }
    }

    if !cfg.auth.client_secret.is_empty() {
        return Ok(());
    }

    let dir = config_dir_from(config_path);
    cfg.auth.client_secret = herald_auth::load_or_create_secret(&dir)?;
    info!(path = %dir.join("secret").display(), "client secret loaded from file");
    Ok(())
}

/// The directory holding the secret file: the config file's parent, or
/// `~/.config/herald`.
fn config_dir_from(config_path: Option<&Path>) -> PathBuf {
    if let Some(path) = config_path {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                return parent.to_path_buf();
            }
        }
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".config").join("herald"),
        Err(_) => PathBuf::from("."),
    }
}

fn setup_logging(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.server.log_level.clone()));

    let stdout_layer = tracing_subscriber::fmt::layer();

    if cfg.server.log_file.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.server.log_file)
    {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::sync::Mutex::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            warn!(path = %cfg.server.log_file, error = %e, "failed to open log file, using stdout only");
        }
    }
}
