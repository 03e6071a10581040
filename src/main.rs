//! Upbit auto-trader - main entry point
//!
//! This binary provides two subcommands:
//! - serve: Run the trading control API (sessions, pass-through endpoints)
//! - markets: List the exchange's tradable markets

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use upbit_autotrader::config::AppConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "upbit-autotrader")]
#[command(about = "Automated Upbit trading engine with a session control API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading control API
    Serve {
        /// Bind host (overrides config and HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List tradable markets
    Markets {
        /// Only show markets quoted in this currency, e.g. "KRW"
        #[arg(short, long)]
        quote: Option<String>,
    },
}

/// Default filter: the base level for our crate and HTTP request traces,
/// with noisy transport crates kept at warn
fn log_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!(
        "{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn,tower_http={level}"
    )
}

fn setup_logging(verbose: bool, command_name: &str, log_dir: &str) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = Path::new(log_dir).join(&log_filename);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)));

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format as the console, without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    let command_name = match &cli.command {
        Commands::Serve { .. } => "serve",
        Commands::Markets { .. } => "markets",
    };
    setup_logging(cli.verbose, command_name, &config.logging.dir)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve::run(config)
        }
        Commands::Markets { quote } => commands::markets::run(config, quote),
    }
}
