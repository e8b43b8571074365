//! Where `settings.toml` and the key ledger live.
//!
//! By default the platform directories from `dirs` are used:
//!
//! | Platform | settings.toml                                   | ledger.db                                        |
//! |----------|-------------------------------------------------|--------------------------------------------------|
//! | Linux    | `~/.config/reflex-coach/`                       | `~/.local/share/reflex-coach/`                   |
//! | macOS    | `~/Library/Application Support/reflex-coach/`   | `~/Library/Application Support/reflex-coach/`    |
//! | Windows  | `%APPDATA%\reflex-coach\`                       | `%LOCALAPPDATA%\reflex-coach\`                   |
//!
//! Setting `REFLEX_HOME` puts both files under one directory instead, which
//! is what server deployments and containers usually want.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the platform directories.
pub const HOME_ENV: &str = "REFLEX_HOME";

const APP_DIR: &str = "reflex-coach";
const SETTINGS_FILE: &str = "settings.toml";
const DATABASE_FILE: &str = "ledger.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Holds `settings.toml`.
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    /// Holds the SQLite key ledger.
    pub data_dir: PathBuf,
    pub database_file: PathBuf,
}

impl AppPaths {
    /// `REFLEX_HOME` when set and non-empty, platform directories otherwise.
    pub fn new() -> Self {
        match std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            Some(home) => Self::rooted(home),
            None => Self::platform(),
        }
    }

    /// Everything directly under `root`.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::split(root.to_path_buf(), root.to_path_buf())
    }

    fn platform() -> Self {
        // cwd fallback for platforms without a home directory
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self::split(config_dir, data_dir)
    }

    fn split(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            settings_file: config_dir.join(SETTINGS_FILE),
            database_file: data_dir.join(DATABASE_FILE),
            config_dir,
            data_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
