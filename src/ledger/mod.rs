//! Key rotation ledger: which API key to use next, and what happened to it.
//!
//! This module provides:
//! * [`KeyLedger`]: the storage-agnostic trait the orchestrator depends on.
//! * [`SqliteLedger`]: persistent implementation on `rusqlite`.
//! * [`InMemoryLedger`]: same semantics, no I/O; used by tests and
//!   throw-away runs.
//! * Records: [`ProviderConfig`], [`ApiKeyRecord`], [`UsageLogEntry`].
//!
//! # Selection policy
//!
//! [`KeyLedger::get_available_key`] considers keys whose provider **and** own
//! flag are active, orders them by `last_used_at` ascending with never-used
//! keys first, and returns the first one.  Selection does not lock the row:
//! two concurrent requests may pick the same key.

pub mod memory;
pub mod model;
pub mod sqlite;

use std::time::Duration;

use thiserror::Error;

pub use memory::InMemoryLedger;
pub use model::{ApiKeyRecord, KeyId, NewProvider, ProviderConfig, ProviderId, UsageLogEntry};
pub use sqlite::SqliteLedger;

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

/// Errors raised by ledger storage.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying SQLite failure.
    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A named provider does not exist.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// A key id does not exist.
    #[error("unknown API key id: {0}")]
    UnknownKey(KeyId),

    /// Provider settings that could never serve a request.
    #[error("invalid provider '{name}': {reason}")]
    InvalidProvider { name: String, reason: String },

    /// A stored value could not be interpreted (e.g. a bad timestamp).
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    /// The connection mutex was poisoned by a panicking thread.
    #[error("ledger lock poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// KeyLedger trait
// ---------------------------------------------------------------------------

/// Bookkeeping for provider credentials.
///
/// Implementors must be `Send + Sync`; one instance is shared by every
/// concurrent orchestrator (`Arc<dyn KeyLedger>`).
///
/// `record_success` / `record_failure` on an id that no longer exists are
/// silent no-ops: the key may have been deleted between selection and the
/// end of the call.
pub trait KeyLedger: Send + Sync {
    // ---- rotation -------------------------------------------------------

    /// Least-recently-used eligible key for `provider_name`, or `None`.
    fn get_available_key(&self, provider_name: &str) -> Result<Option<ApiKeyRecord>, LedgerError>;

    /// Count one successful call against `key_id`.
    ///
    /// `tokens_used` and `latency` are accepted for accounting; the key row
    /// itself only tracks `request_count` and `last_used_at`.
    fn record_success(
        &self,
        key_id: KeyId,
        tokens_used: u64,
        latency: Duration,
    ) -> Result<(), LedgerError>;

    /// Count one failed call against `key_id`.  Never deactivates the key.
    fn record_failure(&self, key_id: KeyId, error_message: &str) -> Result<(), LedgerError>;

    /// Append a row to the usage log.
    fn log_usage(&self, entry: &UsageLogEntry) -> Result<(), LedgerError>;

    // ---- lookups --------------------------------------------------------

    /// Provider by name, active or not.
    fn provider(&self, name: &str) -> Result<Option<ProviderConfig>, LedgerError>;

    /// All providers, ordered by priority then name.
    fn list_providers(&self) -> Result<Vec<ProviderConfig>, LedgerError>;

    /// Key by id.
    fn key(&self, key_id: KeyId) -> Result<Option<ApiKeyRecord>, LedgerError>;

    /// All keys of a provider, ordered by id.
    fn list_keys(&self, provider_name: &str) -> Result<Vec<ApiKeyRecord>, LedgerError>;

    /// Usage log rows for one practice session, oldest first.
    fn usage_for_session(&self, session_id: &str) -> Result<Vec<UsageLogEntry>, LedgerError>;

    // ---- administration -------------------------------------------------

    /// Insert a provider, or update every field of the existing one with the
    /// same name.
    fn upsert_provider(&self, provider: &NewProvider) -> Result<ProviderConfig, LedgerError>;

    /// Store a new, active, never-used key holding `api_key_encrypted`.
    fn add_key(
        &self,
        provider_name: &str,
        key_name: &str,
        api_key_encrypted: &str,
    ) -> Result<ApiKeyRecord, LedgerError>;

    fn set_key_active(&self, key_id: KeyId, active: bool) -> Result<(), LedgerError>;

    fn set_provider_active(&self, name: &str, active: bool) -> Result<(), LedgerError>;

    /// Remove a provider together with all of its keys.
    ///
    /// Returns `false` when no such provider existed.
    fn delete_provider(&self, name: &str) -> Result<bool, LedgerError>;
}

// ---------------------------------------------------------------------------
// Shared contract tests
// ---------------------------------------------------------------------------
