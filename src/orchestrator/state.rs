//! Orchestrator state machine and per-attempt outcomes.
//!
//! One request walks the priority chain exactly once:
//!
//! ```text
//! Trying(0) ──Success──▶ Succeeded
//!     │
//!     └─Failure / Unavailable──▶ Trying(1) ──▶ … ──▶ Trying(n)
//!                                                     │
//!                                                     ▼
//!                                                 Degraded
//! ```
//!
//! `Succeeded` and `Degraded` are terminal; no index is visited twice.

use std::time::Duration;

use thiserror::Error;

use crate::llm::{AnalysisResult, ProviderAnalysis, ProviderError};
use crate::vault::VaultError;

// ---------------------------------------------------------------------------
// AttemptFailure
// ---------------------------------------------------------------------------

/// Why one provider attempt did not produce an analysis.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptFailure {
    /// No usable key: provider unregistered or inactive, no active key, or
    /// the ledger could not be read.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The stored key could not be decrypted with the configured secret.
    #[error("stored key could not be decrypted: {0}")]
    DecryptionError(VaultError),

    /// The vendor call failed.
    #[error(transparent)]
    Provider(ProviderError),

    /// The call did not finish within the provider's deadline.
    #[error("no answer within {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// AttemptOutcome
// ---------------------------------------------------------------------------

/// Result of trying one provider.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(ProviderAnalysis),
    /// A call was made and failed; the key's failure was recorded.
    Failure(AttemptFailure),
    /// Skipped before any call was made; the ledger was not touched.
    Unavailable(AttemptFailure),
}

// ---------------------------------------------------------------------------
// OrchestratorState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorState {
    /// About to try the provider at this chain index.
    Trying(usize),
    Succeeded(AnalysisResult),
    Degraded(AnalysisResult),
}

impl OrchestratorState {
    pub fn label(&self) -> &'static str {
        match self {
            OrchestratorState::Trying(_) => "Trying",
            OrchestratorState::Succeeded(_) => "Succeeded",
            OrchestratorState::Degraded(_) => "Degraded",
        }
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        OrchestratorState::Trying(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
