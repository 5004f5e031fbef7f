//! CLI entry point for ticksync.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

use commands::Vault;

mod commands;

/// Offline inspection and maintenance of a ticksync vault.
#[derive(Parser, Debug)]
#[command(
    name = "ticksync",
    version,
    about = "ticksync: Markdown task lines kept in sync with a remote task service"
)]
struct Cli {
    /// Vault root directory (defaults to current).
    #[arg(long)]
    vault: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dry-run scan of one document against the cache.
    Scan {
        /// Vault-relative document path.
        path: String,
    },

    /// Show counts of cached tasks, tracked files and projects.
    Status,

    /// Drop stale file metadata from the cache.
    Prune,

    /// Print the effective configuration.
    Config,
}

fn main() -> Result<()> {
    let Cli { vault, cmd } = Cli::parse();
    install_tracing();

    let root = vault.unwrap_or_else(|| ".".to_owned());
    let vault = Vault::open(&root)?;
    tokio::runtime::Runtime::new()?.block_on(commands::run(cmd, &vault, &mut std::io::stdout()))
}

fn install_tracing() {
    // RUST_LOG is honoured; INFO by default.
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();
}
