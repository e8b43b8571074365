//! SQLite-backed [`KeyLedger`].
//!
//! Tables:
//!
//! ```text
//! llm_providers   1 ──< llm_api_keys        (ON DELETE CASCADE)
//! llm_providers   1 ──< llm_usage_logs      (ON DELETE SET NULL)
//! ```
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed microsecond
//! precision, so lexical order equals chronological order.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::model::{advance, ApiKeyRecord, KeyId, NewProvider, ProviderConfig, UsageLogEntry};
use super::{KeyLedger, LedgerError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS llm_providers (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_name       TEXT NOT NULL UNIQUE,
    is_active           INTEGER NOT NULL DEFAULT 1,
    priority            INTEGER NOT NULL DEFAULT 0,
    requests_per_minute INTEGER NOT NULL DEFAULT 60,
    tokens_per_minute   INTEGER,
    failure_threshold   INTEGER NOT NULL DEFAULT 3,
    timeout_seconds     INTEGER NOT NULL DEFAULT 60,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS llm_api_keys (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id       INTEGER NOT NULL REFERENCES llm_providers(id) ON DELETE CASCADE,
    key_name          TEXT NOT NULL,
    api_key_encrypted TEXT NOT NULL,
    is_active         INTEGER NOT NULL DEFAULT 1,
    last_used_at      TEXT,
    request_count     INTEGER NOT NULL DEFAULT 0,
    failure_count     INTEGER NOT NULL DEFAULT 0,
    last_failure_at   TEXT,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_provider_active ON llm_api_keys(provider_id, is_active);

CREATE TABLE IF NOT EXISTS llm_usage_logs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id   INTEGER REFERENCES llm_providers(id) ON DELETE SET NULL,
    provider_name TEXT NOT NULL,
    api_key_id    INTEGER REFERENCES llm_api_keys(id) ON DELETE SET NULL,
    session_id    TEXT NOT NULL,
    total_tokens  INTEGER NOT NULL DEFAULT 0,
    latency_ms    REAL NOT NULL,
    success       INTEGER NOT NULL,
    error_message TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_session_created ON llm_usage_logs(session_id, created_at);
"#;

const PROVIDER_COLUMNS: &str = "id, provider_name, is_active, priority, requests_per_minute, \
     tokens_per_minute, failure_threshold, timeout_seconds, created_at, updated_at";

const KEY_SELECT: &str = "SELECT k.id, k.provider_id, p.provider_name, k.key_name, \
     k.api_key_encrypted, k.is_active, k.last_used_at, k.request_count, k.failure_count, \
     k.last_failure_at, k.created_at \
     FROM llm_api_keys k JOIN llm_providers p ON p.id = k.provider_id";

// ---------------------------------------------------------------------------
// SqliteLedger
// ---------------------------------------------------------------------------

/// Ledger persisted in a SQLite database file.
///
/// The connection sits behind a `std::sync::Mutex`; every method takes the
/// lock for a single short statement batch and never across an `.await`.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| LedgerError::Corrupt(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Fresh private in-memory database.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        log::debug!("ledger: schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn provider_in(conn: &Connection, name: &str) -> Result<Option<ProviderConfig>, LedgerError> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM llm_providers WHERE provider_name = ?1");
        let raw = conn.query_row(&sql, params![name], map_provider).optional()?;
        raw.map(RawProvider::finish).transpose()
    }

    fn key_in(conn: &Connection, key_id: KeyId) -> Result<Option<ApiKeyRecord>, LedgerError> {
        let sql = format!("{KEY_SELECT} WHERE k.id = ?1");
        let raw = conn.query_row(&sql, params![key_id], map_key).optional()?;
        raw.map(RawKey::finish).transpose()
    }
}

impl KeyLedger for SqliteLedger {
    fn get_available_key(&self, provider_name: &str) -> Result<Option<ApiKeyRecord>, LedgerError> {
        let conn = self.lock()?;
        // `last_used_at IS NOT NULL` sorts never-used rows (0) ahead of used ones (1).
        let sql = format!(
            "{KEY_SELECT} \
             WHERE p.provider_name = ?1 AND p.is_active = 1 AND k.is_active = 1 \
             ORDER BY k.last_used_at IS NOT NULL, k.last_used_at ASC, k.id ASC \
             LIMIT 1"
        );
        let raw = conn.query_row(&sql, params![provider_name], map_key).optional()?;
        raw.map(RawKey::finish).transpose()
    }

    fn record_success(
        &self,
        key_id: KeyId,
        tokens_used: u64,
        latency: Duration,
    ) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let current: Option<Option<String>> = conn
            .query_row(
                "SELECT last_used_at FROM llm_api_keys WHERE id = ?1",
                params![key_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            log::debug!("ledger: record_success on missing key {key_id}");
            return Ok(());
        };

        let stamp = advance(parse_optional_ts(current)?, Utc::now());
        conn.execute(
            "UPDATE llm_api_keys SET request_count = request_count + 1, last_used_at = ?2 \
             WHERE id = ?1",
            params![key_id, format_ts(&stamp)],
        )?;
        log::debug!(
            "ledger: key {key_id} success (tokens={tokens_used}, latency={:.0}ms)",
            latency.as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn record_failure(&self, key_id: KeyId, error_message: &str) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE llm_api_keys SET failure_count = failure_count + 1, last_failure_at = ?2 \
             WHERE id = ?1",
            params![key_id, format_ts(&Utc::now())],
        )?;
        if changed > 0 {
            log::debug!("ledger: key {key_id} failure: {error_message}");
        }
        Ok(())
    }

    fn log_usage(&self, entry: &UsageLogEntry) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let provider_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM llm_providers WHERE provider_name = ?1",
                params![entry.provider_name],
                |row| row.get(0),
            )
            .optional()?;
        // A key deleted mid-call must not break the foreign key.
        let key_id = match entry.api_key_id {
            Some(id) => conn
                .query_row(
                    "SELECT id FROM llm_api_keys WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?,
            None => None,
        };
        conn.execute(
            "INSERT INTO llm_usage_logs (provider_id, provider_name, api_key_id, session_id, \
             total_tokens, latency_ms, success, error_message, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                provider_id,
                entry.provider_name,
                key_id,
                entry.session_id,
                to_sql_count(entry.total_tokens),
                entry.latency_ms,
                entry.success,
                entry.error_message,
                format_ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    fn provider(&self, name: &str) -> Result<Option<ProviderConfig>, LedgerError> {
        let conn = self.lock()?;
        Self::provider_in(&conn, name)
    }

    fn list_providers(&self) -> Result<Vec<ProviderConfig>, LedgerError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {PROVIDER_COLUMNS} FROM llm_providers ORDER BY priority ASC, provider_name ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_provider)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.finish()?);
        }
        Ok(out)
    }

    fn key(&self, key_id: KeyId) -> Result<Option<ApiKeyRecord>, LedgerError> {
        let conn = self.lock()?;
        Self::key_in(&conn, key_id)
    }

    fn list_keys(&self, provider_name: &str) -> Result<Vec<ApiKeyRecord>, LedgerError> {
        let conn = self.lock()?;
        let sql = format!("{KEY_SELECT} WHERE p.provider_name = ?1 ORDER BY k.id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![provider_name], map_key)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.finish()?);
        }
        Ok(out)
    }

    fn usage_for_session(&self, session_id: &str) -> Result<Vec<UsageLogEntry>, LedgerError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT provider_name, api_key_id, session_id, total_tokens, latency_ms, success, \
             error_message, created_at FROM llm_usage_logs WHERE session_id = ?1 \
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (provider_name, api_key_id, session_id, tokens, latency_ms, success, error, at) =
                row?;
            out.push(UsageLogEntry {
                provider_name,
                api_key_id,
                session_id,
                total_tokens: from_sql_count(tokens),
                latency_ms,
                success,
                error_message: error,
                created_at: parse_ts(&at)?,
            });
        }
        Ok(out)
    }

    fn upsert_provider(&self, provider: &NewProvider) -> Result<ProviderConfig, LedgerError> {
        provider.validate()?;
        let conn = self.lock()?;
        let now = format_ts(&Utc::now());
        conn.execute(
            "INSERT INTO llm_providers (provider_name, is_active, priority, requests_per_minute, \
             tokens_per_minute, failure_threshold, timeout_seconds, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
             ON CONFLICT(provider_name) DO UPDATE SET \
               is_active = excluded.is_active, priority = excluded.priority, \
               requests_per_minute = excluded.requests_per_minute, \
               tokens_per_minute = excluded.tokens_per_minute, \
               failure_threshold = excluded.failure_threshold, \
               timeout_seconds = excluded.timeout_seconds, \
               updated_at = excluded.updated_at",
            params![
                provider.name,
                provider.is_active,
                provider.priority,
                provider.requests_per_minute,
                provider.tokens_per_minute,
                provider.failure_threshold,
                to_sql_count(provider.timeout_seconds),
                now,
            ],
        )?;
        Self::provider_in(&conn, &provider.name)?
            .ok_or_else(|| LedgerError::UnknownProvider(provider.name.clone()))
    }

    fn add_key(
        &self,
        provider_name: &str,
        key_name: &str,
        api_key_encrypted: &str,
    ) -> Result<ApiKeyRecord, LedgerError> {
        let conn = self.lock()?;
        let provider = Self::provider_in(&conn, provider_name)?
            .ok_or_else(|| LedgerError::UnknownProvider(provider_name.to_string()))?;
        conn.execute(
            "INSERT INTO llm_api_keys (provider_id, key_name, api_key_encrypted, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![provider.id, key_name, api_key_encrypted, format_ts(&Utc::now())],
        )?;
        let id = conn.last_insert_rowid();
        Self::key_in(&conn, id)?.ok_or(LedgerError::UnknownKey(id))
    }

    fn set_key_active(&self, key_id: KeyId, active: bool) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE llm_api_keys SET is_active = ?2 WHERE id = ?1",
            params![key_id, active],
        )?;
        if changed == 0 {
            return Err(LedgerError::UnknownKey(key_id));
        }
        Ok(())
    }

    fn set_provider_active(&self, name: &str, active: bool) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE llm_providers SET is_active = ?2, updated_at = ?3 WHERE provider_name = ?1",
            params![name, active, format_ts(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(LedgerError::UnknownProvider(name.to_string()));
        }
        Ok(())
    }

    fn delete_provider(&self, name: &str) -> Result<bool, LedgerError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM llm_providers WHERE provider_name = ?1",
            params![name],
        )?;
        Ok(changed > 0)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Provider row with timestamps still as text; parsed outside the rusqlite
/// closure so parse failures surface as [`LedgerError::Corrupt`].
struct RawProvider {
    id: i64,
    name: String,
    is_active: bool,
    priority: i32,
    requests_per_minute: u32,
    tokens_per_minute: Option<u32>,
    failure_threshold: u32,
    timeout_seconds: i64,
    created_at: String,
    updated_at: String,
}

impl RawProvider {
    fn finish(self) -> Result<ProviderConfig, LedgerError> {
        Ok(ProviderConfig {
            id: self.id,
            name: self.name,
            is_active: self.is_active,
            priority: self.priority,
            requests_per_minute: self.requests_per_minute,
            tokens_per_minute: self.tokens_per_minute,
            failure_threshold: self.failure_threshold,
            timeout_seconds: from_sql_count(self.timeout_seconds),
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn map_provider(row: &Row<'_>) -> rusqlite::Result<RawProvider> {
    Ok(RawProvider {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get(2)?,
        priority: row.get(3)?,
        requests_per_minute: row.get(4)?,
        tokens_per_minute: row.get(5)?,
        failure_threshold: row.get(6)?,
        timeout_seconds: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

struct RawKey {
    id: i64,
    provider_id: i64,
    provider_name: String,
    key_name: String,
    api_key_encrypted: String,
    is_active: bool,
    last_used_at: Option<String>,
    request_count: i64,
    failure_count: i64,
    last_failure_at: Option<String>,
    created_at: String,
}

impl RawKey {
    fn finish(self) -> Result<ApiKeyRecord, LedgerError> {
        Ok(ApiKeyRecord {
            id: self.id,
            provider_id: self.provider_id,
            provider_name: self.provider_name,
            key_name: self.key_name,
            api_key_encrypted: self.api_key_encrypted,
            is_active: self.is_active,
            last_used_at: parse_optional_ts(self.last_used_at)?,
            request_count: from_sql_count(self.request_count),
            failure_count: from_sql_count(self.failure_count),
            last_failure_at: parse_optional_ts(self.last_failure_at)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn map_key(row: &Row<'_>) -> rusqlite::Result<RawKey> {
    Ok(RawKey {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        provider_name: row.get(2)?,
        key_name: row.get(3)?,
        api_key_encrypted: row.get(4)?,
        is_active: row.get(5)?,
        last_used_at: row.get(6)?,
        request_count: row.get(7)?,
        failure_count: row.get(8)?,
        last_failure_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("timestamp {value:?}: {e}")))
}

fn parse_optional_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, LedgerError> {
    value.as_deref().map(parse_ts).transpose()
}

fn to_sql_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract;
    use tempfile::tempdir;

    fn memory_ledger() -> SqliteLedger {
        SqliteLedger::open_in_memory().expect("in-memory sqlite")
    }

    #[test]
    fn satisfies_ledger_contract() {
        contract::run_all(memory_ledger);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("ledger.db");

        let key_id = {
            let ledger = SqliteLedger::open(&path).expect("open");
            ledger.upsert_provider(&NewProvider::new("openai", 1)).unwrap();
            let k = ledger.add_key("openai", "k1", "cipher").unwrap();
            ledger
                .record_success(k.id, 10, Duration::from_millis(300))
                .unwrap();
            k.id
        };

        let ledger = SqliteLedger::open(&path).expect("reopen");
        let key = ledger.key(key_id).unwrap().expect("key persisted");
        assert_eq!(key.request_count, 1);
        assert_eq!(key.api_key_encrypted, "cipher");
        assert!(key.last_used_at.is_some());
    }

    #[test]
    fn last_used_never_moves_backwards() {
        let ledger = memory_ledger();
        ledger.upsert_provider(&NewProvider::new("openai", 1)).unwrap();
        let k = ledger.add_key("openai", "k", "c").unwrap();

        // Simulate a clock that was ahead when the stamp was written.
        let future = Utc::now() + chrono::Duration::hours(1);
        ledger
            .lock()
            .unwrap()
            .execute(
                "UPDATE llm_api_keys SET last_used_at = ?2 WHERE id = ?1",
                params![k.id, format_ts(&future)],
            )
            .unwrap();

        ledger.record_success(k.id, 0, Duration::ZERO).unwrap();
        let after = ledger.key(k.id).unwrap().unwrap();
        assert_eq!(after.request_count, 1);
        assert_eq!(after.last_used_at.map(|t| format_ts(&t)), Some(format_ts(&future)));
    }

    #[test]
    fn usage_log_survives_key_deletion() {
        let ledger = memory_ledger();
        ledger.upsert_provider(&NewProvider::new("gemini", 1)).unwrap();
        let k = ledger.add_key("gemini", "k", "c").unwrap();
        ledger.delete_provider("gemini").unwrap();

        ledger
            .log_usage(&UsageLogEntry {
                provider_name: "gemini".into(),
                api_key_id: Some(k.id),
                session_id: "s".into(),
                total_tokens: 0,
                latency_ms: 1.0,
                success: false,
                error_message: Some("gone".into()),
                created_at: Utc::now(),
            })
            .unwrap();

        let rows = ledger.usage_for_session("s").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].api_key_id, None);
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let ledger = memory_ledger();
        ledger.upsert_provider(&NewProvider::new("openai", 1)).unwrap();
        let k = ledger.add_key("openai", "k", "c").unwrap();
        ledger
            .lock()
            .unwrap()
            .execute(
                "UPDATE llm_api_keys SET last_used_at = 'yesterday' WHERE id = ?1",
                params![k.id],
            )
            .unwrap();

        let err = ledger.key(k.id).unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)), "{err}");
    }

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_ts(&earlier) < format_ts(&later));
    }
}
