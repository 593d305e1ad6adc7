//! lorekeep CLI — the main entry point.
//!
//! Commands:
//! - `run`      — Run the full pipeline for one client
//! - `serve`    — Start the HTTP gateway
//! - `sources`  — List a client's registered data sources
//! - `config`   — Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lorekeep_config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::run::SourceArg;

#[derive(Parser)]
#[command(
    name = "lorekeep",
    about = "lorekeep — agents that turn company data into a knowledge base",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.lorekeep/config.toml)
    #[arg(short, long, global = true, env = "LOREKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run explore, structure, verify and use for one client
    Run {
        #[arg(long, env = "LOREKEEP_CLIENT_ID")]
        client_id: String,

        /// Data source as `type:label`; repeatable. Defaults to the
        /// backend's list, then the configured defaults.
        #[arg(long = "source", value_parser = commands::run::parse_source)]
        sources: Vec<SourceArg>,
    },

    /// Start the HTTP gateway
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the data sources registered for a client
    Sources {
        #[arg(long, env = "LOREKEEP_CLIENT_ID")]
        client_id: String,
    },

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print a default config file instead
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Commands::Config { default: true } = cli.command {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = load_config(cli.config)?;
    match cli.command {
        Commands::Run { client_id, sources } => commands::run::run(config, &client_id, sources).await,
        Commands::Serve { host, port } => commands::serve::run(config, host, port).await,
        Commands::Sources { client_id } => commands::sources::run(config, &client_id).await,
        Commands::Config { .. } => commands::config_cmd::show(&config),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "lorekeep=debug,tower_http=debug"
    } else {
        "lorekeep=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let Some(path) = path else {
        return Ok(AppConfig::load()?);
    };
    let mut config = AppConfig::load_from(&path)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
