//! Ledger records: provider configuration, API key bookkeeping, usage log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::LedgerError;

/// Row id of an [`ApiKeyRecord`].
pub type KeyId = i64;

/// Row id of a [`ProviderConfig`].
pub type ProviderId = i64;

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// One external AI vendor as registered by an administrator.
///
/// `requests_per_minute`, `tokens_per_minute` and `failure_threshold` are
/// stored for operators but not enforced anywhere in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    /// Unique vendor name, e.g. `"openai"`.
    pub name: String,
    pub is_active: bool,
    /// Lower runs first.
    pub priority: i32,
    pub requests_per_minute: u32,
    pub tokens_per_minute: Option<u32>,
    pub failure_threshold: u32,
    /// Hard deadline for a single vendor call.
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderConfig {
    /// Per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Fields an administrator supplies when registering or updating a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProvider {
    pub name: String,
    pub is_active: bool,
    pub priority: i32,
    pub requests_per_minute: u32,
    pub tokens_per_minute: Option<u32>,
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl NewProvider {
    /// A provider with the stock budgets (60 rpm, threshold 3, 60 s timeout).
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            is_active: true,
            priority,
            requests_per_minute: 60,
            tokens_per_minute: None,
            failure_threshold: 3,
            timeout_seconds: 60,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Reject settings under which every call would fail at once.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.timeout_seconds == 0 {
            return Err(LedgerError::InvalidProvider {
                name: self.name.clone(),
                reason: "timeout must be at least 1 second".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ApiKeyRecord
// ---------------------------------------------------------------------------

/// One credential belonging to a provider.
///
/// Only the ciphertext is ever stored; see [`CredentialVault`].
///
/// [`CredentialVault`]: crate::vault::CredentialVault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: KeyId,
    pub provider_id: ProviderId,
    pub provider_name: String,
    /// Human label, e.g. `"team-billing-1"`.
    pub key_name: String,
    pub api_key_encrypted: String,
    pub is_active: bool,
    /// `None` means the key has never been used.
    pub last_used_at: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub failure_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UsageLogEntry
// ---------------------------------------------------------------------------

/// One vendor call attempt, appended after the outcome is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub provider_name: String,
    pub api_key_id: Option<KeyId>,
    pub session_id: String,
    pub total_tokens: u64,
    pub latency_ms: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Keeps `last_used_at` monotonic: never replace a stamp with an older one.
pub(crate) fn advance(current: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match current {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}
