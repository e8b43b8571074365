//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::ledger::NewProvider;
use crate::llm::gemini::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use crate::llm::openai::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL};

// ---------------------------------------------------------------------------
// ProviderSettings
// ---------------------------------------------------------------------------

/// Connection details and budgets for one AI vendor.
///
/// The budget fields are copied into the ledger's provider row on startup;
/// `base_url` and `model` stay in configuration and are handed to the client
/// factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Vendor name, e.g. `"openai"` or `"gemini"`.
    pub name: String,
    /// Base URL of the vendor API, without a trailing path.
    pub base_url: String,
    /// Model identifier sent to the vendor.
    pub model: String,
    /// Lower number = tried earlier when listing; the orchestrator order is
    /// `LlmConfig::priority_chain`.
    pub priority: i32,
    /// Maximum seconds to wait for one analysis call.
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
    pub tokens_per_minute: Option<u32>,
    /// Consecutive failures tolerated before a key should be parked.
    /// Recorded only; keys are never deactivated automatically.
    pub failure_threshold: u32,
    pub active: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_url: String::new(),
            model: String::new(),
            priority: 100,
            timeout_secs: 60,
            requests_per_minute: 60,
            tokens_per_minute: None,
            failure_threshold: 3,
            active: true,
        }
    }
}

impl ProviderSettings {
    pub fn openai() -> Self {
        Self {
            name: "openai".into(),
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
            model: DEFAULT_OPENAI_MODEL.into(),
            priority: 1,
            ..Self::default()
        }
    }

    pub fn gemini() -> Self {
        Self {
            name: "gemini".into(),
            base_url: DEFAULT_GEMINI_BASE_URL.into(),
            model: DEFAULT_GEMINI_MODEL.into(),
            priority: 2,
            ..Self::default()
        }
    }

    /// The ledger row these settings describe.
    pub fn to_new_provider(&self) -> NewProvider {
        NewProvider {
            name: self.name.clone(),
            is_active: self.active,
            priority: self.priority,
            requests_per_minute: self.requests_per_minute,
            tokens_per_minute: self.tokens_per_minute,
            failure_threshold: self.failure_threshold,
            timeout_seconds: self.timeout_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

/// Provider orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Vendors in the order the orchestrator tries them.
    pub priority_chain: Vec<String>,
    /// Environment variable holding the key-encryption secret.
    pub encryption_secret_env: String,
    /// Per-vendor connection details.
    pub providers: Vec<ProviderSettings>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            priority_chain: vec!["openai".into(), "gemini".into()],
            encryption_secret_env: "REFLEX_ENCRYPTION_KEY".into(),
            providers: vec![ProviderSettings::openai(), ProviderSettings::gemini()],
        }
    }
}

impl LlmConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name == name)
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Where the key ledger lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the SQLite file; `None` uses [`AppPaths::database_file`].
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| AppPaths::new().database_file)
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use reflex_coach::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
