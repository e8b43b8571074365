//! Provider orchestration with graceful degradation.
//!
//! This module ties the ledger, the vault and the vendor clients together.
//! A request walks the configured priority chain; the first provider that
//! answers wins, and when every provider fails the trainee still gets a
//! heuristic analysis built from the prosody measurements.
//!
//! # Architecture
//!
//! ```text
//! AnalysisRequest
//!        │
//!        ▼
//! Orchestrator::analyze_speech()
//!        │
//!        ├─ KeyLedger::get_available_key   (least recently used key)
//!        ├─ CredentialVault::decrypt       (fresh every attempt)
//!        ├─ ClientFactory::build           (OpenAI / Gemini)
//!        ├─ tokio::time::timeout(SpeechAnalyzer::analyze_speech)
//!        └─ KeyLedger::record_success / record_failure / log_usage
//!        │
//!        ▼
//! AnalysisResult  (provider name, or "degraded")
//! ```

pub mod degraded;
pub mod runner;
pub mod state;

/// `provider_used` of a result produced without any vendor.
pub const DEGRADED_PROVIDER: &str = "degraded";

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use degraded::degraded_response;
pub use runner::{Orchestrator, OrchestratorError, ProviderHealth};
pub use state::{AttemptFailure, AttemptOutcome, OrchestratorState};
