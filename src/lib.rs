//! Speech-practice coaching backend: LLM provider orchestration.
//!
//! * [`vault`]: encryption of provider API keys at rest.
//! * [`ledger`]: provider registry, key rotation and usage log.
//! * [`llm`]: OpenAI / Gemini speech-analysis clients.
//! * [`orchestrator`]: priority-chain fallback with a degraded mode.
//! * [`config`]: `settings.toml` and platform paths.
//! * [`cli`]: the `reflex-coach` administration commands.

pub mod cli;
pub mod config;
pub mod ledger;
pub mod llm;
pub mod orchestrator;
pub mod vault;
