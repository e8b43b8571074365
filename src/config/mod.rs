//! Configuration module for the speech coach backend.
//!
//! Provides `AppConfig` (top-level settings), the `llm` and `storage`
//! sections, `AppPaths` for cross-platform data directories, and TOML
//! persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, LlmConfig, ProviderSettings, StorageConfig};
