//! Application entry point for `reflex-coach`.
//!
//! # Startup sequence
//!
//! 1. Load `.env` (if present) so the encryption secret and API keys can
//!    live next to the binary during development.
//! 2. Parse the command line.
//! 3. Initialise logging (`RUST_LOG` wins; `--verbose` means debug).
//! 4. Load [`AppConfig`] from disk (returns default on first run).
//! 5. Create a [`tokio`] runtime and run the selected command on it.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use reflex_coach::cli::{self, Cli, Commands};
use reflex_coach::config::{AppConfig, AppPaths};

fn main() -> Result<()> {
    // 1. .env
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: could not read .env: {e}");
        }
    }

    // 2. Arguments
    let args = Cli::parse();

    // 3. Logging
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    // 4. Configuration
    let config_path: PathBuf = args
        .config
        .clone()
        .unwrap_or_else(|| AppPaths::new().settings_file);
    let config = match &args.command {
        // `config init` must work even when the existing file is broken.
        Commands::Config(_) => AppConfig::load_from(&config_path).unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
        _ => AppConfig::load_from(&config_path)?,
    };
    log::debug!("config loaded from {}", config_path.display());

    // 5. Runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let mut stdout = std::io::stdout().lock();
    rt.block_on(cli::execute(args.command, &config, &config_path, &mut stdout))
}
