//! Command handlers.
//!
//! Each handler writes human-readable output to `out` so it can be driven
//! from tests with an in-memory buffer.  Errors are `anyhow` at this layer.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::{AppConfig, LlmConfig};
use crate::ledger::{KeyLedger, NewProvider, SqliteLedger};
use crate::llm::{AnalysisRequest, VendorClientFactory};
use crate::orchestrator::Orchestrator;
use crate::vault::CredentialVault;

use super::args::{AnalyzeArgs, Commands, ConfigCommand, KeyCommand, ProviderCommand};

/// Run one parsed command.
pub async fn execute(
    command: Commands,
    config: &AppConfig,
    config_path: &Path,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Commands::Config(cmd) => config_command(cmd, config, config_path, out),
        Commands::Provider(cmd) => {
            let ledger = open_ledger(config)?;
            provider_command(cmd, &ledger, out)
        }
        Commands::Key(cmd) => {
            let ledger = open_ledger(config)?;
            key_command(cmd, &ledger, &config.llm.encryption_secret_env, out)
        }
        Commands::Analyze(args) => {
            let orchestrator = build_orchestrator(config, Arc::new(open_ledger(config)?))?;
            analyze_command(&args, &orchestrator, out).await
        }
        Commands::Health => {
            let orchestrator = build_orchestrator(config, Arc::new(open_ledger(config)?))?;
            health_command(&orchestrator, out).await
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Open the SQLite ledger named by the configuration and register any
/// configured provider it does not know yet.
pub fn open_ledger(config: &AppConfig) -> Result<SqliteLedger> {
    let path = config.storage.resolved_database_path();
    let ledger = SqliteLedger::open(&path)
        .with_context(|| format!("opening key ledger at {}", path.display()))?;
    seed_providers(&ledger, &config.llm)?;
    Ok(ledger)
}

/// Insert configured providers that are missing from the ledger.  Rows
/// that already exist are left alone so `provider disable` sticks.
pub fn seed_providers(ledger: &dyn KeyLedger, llm: &LlmConfig) -> Result<()> {
    for settings in &llm.providers {
        if ledger.provider(&settings.name)?.is_none() {
            log::info!("cli: registering configured provider '{}'", settings.name);
            ledger
                .upsert_provider(&settings.to_new_provider())
                .with_context(|| format!("registering provider '{}' from config", settings.name))?;
        }
    }
    Ok(())
}

pub fn build_orchestrator(config: &AppConfig, ledger: Arc<dyn KeyLedger>) -> Result<Orchestrator> {
    let vault = CredentialVault::from_env(&config.llm.encryption_secret_env)?;
    let factory = VendorClientFactory::from_config(&config.llm);
    let orchestrator = Orchestrator::new(
        config.llm.priority_chain.clone(),
        ledger,
        Arc::new(vault),
        Arc::new(factory),
    )?;
    Ok(orchestrator)
}

// ---------------------------------------------------------------------------
// provider
// ---------------------------------------------------------------------------

pub fn provider_command(
    cmd: ProviderCommand,
    ledger: &dyn KeyLedger,
    out: &mut dyn Write,
) -> Result<()> {
    match cmd {
        ProviderCommand::Add {
            name,
            priority,
            timeout,
            inactive,
        } => {
            let mut row = NewProvider::new(name, priority).with_timeout_secs(timeout);
            if inactive {
                row = row.inactive();
            }
            let saved = ledger.upsert_provider(&row)?;
            writeln!(out, "provider '{}' saved (id {})", saved.name, saved.id)?;
        }
        ProviderCommand::List => {
            writeln!(
                out,
                "{:<12} {:>8} {:>8} {:>9} {:>6}",
                "NAME", "PRIORITY", "ACTIVE", "TIMEOUT", "KEYS"
            )?;
            for p in ledger.list_providers()? {
                let keys = ledger.list_keys(&p.name)?.len();
                writeln!(
                    out,
                    "{:<12} {:>8} {:>8} {:>8}s {:>6}",
                    p.name, p.priority, p.is_active, p.timeout_seconds, keys
                )?;
            }
        }
        ProviderCommand::Enable { name } => {
            ledger.set_provider_active(&name, true)?;
            writeln!(out, "provider '{name}' enabled")?;
        }
        ProviderCommand::Disable { name } => {
            ledger.set_provider_active(&name, false)?;
            writeln!(out, "provider '{name}' disabled")?;
        }
        ProviderCommand::Remove { name } => {
            if !ledger.delete_provider(&name)? {
                bail!("unknown provider: {name}");
            }
            writeln!(out, "provider '{name}' removed with its keys")?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// key
// ---------------------------------------------------------------------------

pub fn key_command(
    cmd: KeyCommand,
    ledger: &dyn KeyLedger,
    secret_env: &str,
    out: &mut dyn Write,
) -> Result<()> {
    match cmd {
        KeyCommand::Add {
            provider,
            label,
            value,
        } => {
            let vault = CredentialVault::from_env(secret_env)?;
            let plaintext = match value {
                Some(v) => v,
                None => read_secret_line(&mut std::io::stdin().lock())?,
            };
            if plaintext.trim().is_empty() {
                bail!("API key is empty");
            }
            let sealed = vault.encrypt(plaintext.trim())?;
            let record = ledger.add_key(&provider, &label, &sealed)?;
            writeln!(
                out,
                "key {} ('{}') stored for provider '{}'",
                record.id, record.key_name, record.provider_name
            )?;
        }
        KeyCommand::List { provider } => {
            writeln!(
                out,
                "{:>4} {:<16} {:>6} {:>9} {:>9} {:<25}",
                "ID", "LABEL", "ACTIVE", "REQUESTS", "FAILURES", "LAST USED"
            )?;
            for k in ledger.list_keys(&provider)? {
                let last_used = k
                    .last_used_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into());
                writeln!(
                    out,
                    "{:>4} {:<16} {:>6} {:>9} {:>9} {:<25}",
                    k.id, k.key_name, k.is_active, k.request_count, k.failure_count, last_used
                )?;
            }
        }
        KeyCommand::Enable { id } => {
            ledger.set_key_active(id, true)?;
            writeln!(out, "key {id} enabled")?;
        }
        KeyCommand::Disable { id } => {
            ledger.set_key_active(id, false)?;
            writeln!(out, "key {id} disabled")?;
        }
    }
    Ok(())
}

fn read_secret_line(input: &mut dyn BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).context("reading API key from stdin")?;
    Ok(line.trim().to_string())
}

// ---------------------------------------------------------------------------
// analyze / health
// ---------------------------------------------------------------------------

pub async fn analyze_command(
    args: &AnalyzeArgs,
    orchestrator: &Orchestrator,
    out: &mut dyn Write,
) -> Result<()> {
    let raw = std::fs::read_to_string(&args.request)
        .with_context(|| format!("reading {}", args.request.display()))?;
    let mut request: AnalysisRequest =
        serde_json::from_str(&raw).context("parsing analysis request")?;
    if let Some(session) = &args.session {
        request.session_id = session.clone();
    }

    let result = orchestrator.analyze_speech(&request).await;
    let json = if args.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    writeln!(out, "{json}")?;
    Ok(())
}

pub async fn health_command(orchestrator: &Orchestrator, out: &mut dyn Write) -> Result<()> {
    for (name, health) in orchestrator.health_report().await {
        writeln!(out, "{name:<12} {}", health.label())?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

pub fn config_command(
    cmd: ConfigCommand,
    config: &AppConfig,
    config_path: &Path,
    out: &mut dyn Write,
) -> Result<()> {
    match cmd {
        ConfigCommand::Init { force } => {
            if config_path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            AppConfig::default().save_to(config_path)?;
            writeln!(out, "wrote {}", config_path.display())?;
        }
        ConfigCommand::Show => {
            writeln!(out, "# {}", config_path.display())?;
            write!(out, "{}", toml::to_string_pretty(config)?)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
