//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Speech coach backend: manage provider keys and run analyses.
#[derive(Parser, Debug)]
#[command(name = "reflex-coach")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to settings.toml (defaults to the platform config dir)
    #[arg(long, value_name = "FILE", global = true, env = "REFLEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage AI providers
    #[command(subcommand)]
    Provider(ProviderCommand),

    /// Manage encrypted API keys
    #[command(subcommand)]
    Key(KeyCommand),

    /// Analyze one recording described by a JSON request file
    Analyze(AnalyzeArgs),

    /// Probe every provider of the priority chain
    Health,

    /// Manage settings.toml
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ProviderCommand {
    /// Register a provider or update its settings
    Add {
        name: String,
        /// Lower runs first in listings
        #[arg(long, default_value_t = 100)]
        priority: i32,
        /// Per-call deadline in seconds
        #[arg(
            long,
            value_name = "SECONDS",
            default_value_t = 60,
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        timeout: u64,
        /// Register as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List providers in priority order
    List,
    /// Allow the provider to be used
    Enable { name: String },
    /// Stop using the provider without deleting its keys
    Disable { name: String },
    /// Delete the provider and all of its keys
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// Encrypt and store an API key
    Add {
        provider: String,
        /// Human label, e.g. "primary"
        label: String,
        /// Plaintext key; read from stdin when omitted
        #[arg(long, env = "REFLEX_API_KEY", hide_env_values = true)]
        value: Option<String>,
    },
    /// List keys of a provider with usage counters
    List { provider: String },
    /// Re-activate a key
    Enable { id: i64 },
    /// Take a key out of rotation
    Disable { id: i64 },
}

#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// JSON file with transcript, prosody_features, reference_text, mode
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,

    /// Session id recorded in the usage log (overrides the file)
    #[arg(long)]
    pub session: Option<String>,

    /// Pretty-print the result JSON
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default settings.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "reflex-coach",
            "provider",
            "add",
            "gemini",
            "--priority",
            "2",
            "--timeout",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Provider(ProviderCommand::Add {
                name,
                priority,
                timeout,
                inactive,
            }) => {
                assert_eq!(name, "gemini");
                assert_eq!(priority, 2);
                assert_eq!(timeout, 30);
                assert!(!inactive);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_is_refused() {
        let err = Cli::try_parse_from([
            "reflex-coach", "provider", "add", "openai", "--timeout", "0",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn analyze_requires_request_file() {
        assert!(Cli::try_parse_from(["reflex-coach", "analyze"]).is_err());
        let cli =
            Cli::try_parse_from(["reflex-coach", "analyze", "--request", "req.json", "--pretty"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Analyze(AnalyzeArgs { pretty: true, .. })));
    }
}
