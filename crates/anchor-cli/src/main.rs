//! `anchor`: operator CLI over an Anchor metadata store.
//!
//! # Usage
//!
//! ```
//! anchor reserve file utils.rs
//! anchor finalize 1 --content src/utils.rs
//! anchor verify --artifact 1=src/utils.rs
//! anchor --config ~/.config/anchor/anchor.toml cycles
//! ```
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

mod commands;
mod settings;

use std::path::PathBuf;

use anchor_store_sqlite::SqliteStore;
use anyhow::Context as _;
use clap::Parser;
use commands::Command;
use settings::{Settings, expand_tilde};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Project metadata graph store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "anchor.toml")]
  config: PathBuf,

  /// Store file, overriding `store_path` from the configuration.
  #[arg(long, env = "ANCHOR_STORE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;
  let store_path = cli
    .store
    .map(|p| expand_tilde(&p))
    .unwrap_or(settings.store_path);

  let store = SqliteStore::open(&store_path, settings.audit)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  commands::run(&store, &settings.integrity, cli.command).await
}
