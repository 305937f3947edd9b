//! Keygen CLI
//!
//! Provisions load-test tenants with API keys and policies, and removes
//! them again.
//!
//! # Usage
//!
//! ```bash
//! keygen provision
//! keygen --config perf.toml cleanup all
//! keygen cleanup 50 --format json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use keygen_core::{DeleteLimit, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "keygen")]
#[command(version)]
#[command(about = "Load-test API key fixture generator", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, short, env = "KEYGEN_CONFIG", default_value = "keygen.toml")]
    config: PathBuf,

    /// Output format for the run summary
    #[arg(long, short, default_value = "text")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tenants, keys and policies
    Provision,
    /// Revoke keys and delete fixture rows in the configured domain
    Cleanup {
        /// `all`, or the number of oldest rows to delete per table
        #[arg(value_parser = parse_scope)]
        scope: DeleteLimit,
    },
}

fn parse_scope(raw: &str) -> Result<DeleteLimit, String> {
    if raw.eq_ignore_ascii_case("all") {
        return Ok(DeleteLimit::All);
    }
    match raw.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(DeleteLimit::Oldest(n)),
        _ => Err(format!("expected 'all' or a positive count, got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::info!("keygen v{}", env!("CARGO_PKG_VERSION"));

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Provision => commands::provision::handle(settings, cli.format).await,
        Commands::Cleanup { scope } => commands::cleanup::handle(settings, scope, cli.format).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
