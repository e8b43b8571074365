//! In-process [`KeyLedger`] with the same semantics as the SQLite one.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use super::model::{advance, ApiKeyRecord, KeyId, NewProvider, ProviderConfig, UsageLogEntry};
use super::{KeyLedger, LedgerError};

#[derive(Default)]
struct State {
    providers: Vec<ProviderConfig>,
    keys: Vec<ApiKeyRecord>,
    usage: Vec<UsageLogEntry>,
    next_provider_id: i64,
    next_key_id: i64,
}

impl State {
    fn provider_mut(&mut self, name: &str) -> Option<&mut ProviderConfig> {
        self.providers.iter_mut().find(|p| p.name == name)
    }

    fn key_mut(&mut self, id: KeyId) -> Option<&mut ApiKeyRecord> {
        self.keys.iter_mut().find(|k| k.id == id)
    }
}

/// Ledger kept entirely in memory behind a mutex.  Nothing survives the
/// process.
///
/// ```rust
/// use reflex_coach::ledger::{InMemoryLedger, KeyLedger, NewProvider};
///
/// let ledger = InMemoryLedger::new();
/// ledger.upsert_provider(&NewProvider::new("openai", 1)).unwrap();
/// let key = ledger.add_key("openai", "primary", "<ciphertext>").unwrap();
/// assert_eq!(ledger.get_available_key("openai").unwrap().unwrap().id, key.id);
/// ```
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::Poisoned)
    }
}

impl KeyLedger for InMemoryLedger {
    fn get_available_key(&self, provider_name: &str) -> Result<Option<ApiKeyRecord>, LedgerError> {
        let st = self.lock()?;
        let active_provider = st
            .providers
            .iter()
            .any(|p| p.name == provider_name && p.is_active);
        if !active_provider {
            return Ok(None);
        }

        // `None < Some(_)` for Option, which gives "never used first".
        Ok(st
            .keys
            .iter()
            .filter(|k| k.provider_name == provider_name && k.is_active)
            .min_by_key(|k| (k.last_used_at, k.id))
            .cloned())
    }

    fn record_success(
        &self,
        key_id: KeyId,
        _tokens_used: u64,
        _latency: Duration,
    ) -> Result<(), LedgerError> {
        let mut st = self.lock()?;
        if let Some(key) = st.key_mut(key_id) {
            key.request_count += 1;
            key.last_used_at = Some(advance(key.last_used_at, Utc::now()));
        }
        Ok(())
    }

    fn record_failure(&self, key_id: KeyId, _error_message: &str) -> Result<(), LedgerError> {
        let mut st = self.lock()?;
        if let Some(key) = st.key_mut(key_id) {
            key.failure_count += 1;
            key.last_failure_at = Some(Utc::now());
        }
        Ok(())
    }

    fn log_usage(&self, entry: &UsageLogEntry) -> Result<(), LedgerError> {
        self.lock()?.usage.push(entry.clone());
        Ok(())
    }

    fn provider(&self, name: &str) -> Result<Option<ProviderConfig>, LedgerError> {
        Ok(self
            .lock()?
            .providers
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    fn list_providers(&self) -> Result<Vec<ProviderConfig>, LedgerError> {
        let mut providers = self.lock()?.providers.clone();
        providers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(providers)
    }

    fn key(&self, key_id: KeyId) -> Result<Option<ApiKeyRecord>, LedgerError> {
        Ok(self.lock()?.keys.iter().find(|k| k.id == key_id).cloned())
    }

    fn list_keys(&self, provider_name: &str) -> Result<Vec<ApiKeyRecord>, LedgerError> {
        Ok(self
            .lock()?
            .keys
            .iter()
            .filter(|k| k.provider_name == provider_name)
            .cloned()
            .collect())
    }

    fn usage_for_session(&self, session_id: &str) -> Result<Vec<UsageLogEntry>, LedgerError> {
        Ok(self
            .lock()?
            .usage
            .iter()
            .filter(|u| u.session_id == session_id)
            .cloned()
            .collect())
    }

    fn upsert_provider(&self, provider: &NewProvider) -> Result<ProviderConfig, LedgerError> {
        provider.validate()?;
        let mut st = self.lock()?;
        let now = Utc::now();

        if let Some(existing) = st.provider_mut(&provider.name) {
            existing.is_active = provider.is_active;
            existing.priority = provider.priority;
            existing.requests_per_minute = provider.requests_per_minute;
            existing.tokens_per_minute = provider.tokens_per_minute;
            existing.failure_threshold = provider.failure_threshold;
            existing.timeout_seconds = provider.timeout_seconds;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        st.next_provider_id += 1;
        let config = ProviderConfig {
            id: st.next_provider_id,
            name: provider.name.clone(),
            is_active: provider.is_active,
            priority: provider.priority,
            requests_per_minute: provider.requests_per_minute,
            tokens_per_minute: provider.tokens_per_minute,
            failure_threshold: provider.failure_threshold,
            timeout_seconds: provider.timeout_seconds,
            created_at: now,
            updated_at: now,
        };
        st.providers.push(config.clone());
        Ok(config)
    }

    fn add_key(
        &self,
        provider_name: &str,
        key_name: &str,
        api_key_encrypted: &str,
    ) -> Result<ApiKeyRecord, LedgerError> {
        let mut st = self.lock()?;
        let provider_id = st
            .providers
            .iter()
            .find(|p| p.name == provider_name)
            .map(|p| p.id)
            .ok_or_else(|| LedgerError::UnknownProvider(provider_name.to_string()))?;

        st.next_key_id += 1;
        let record = ApiKeyRecord {
            id: st.next_key_id,
            provider_id,
            provider_name: provider_name.to_string(),
            key_name: key_name.to_string(),
            api_key_encrypted: api_key_encrypted.to_string(),
            is_active: true,
            last_used_at: None,
            request_count: 0,
            failure_count: 0,
            last_failure_at: None,
            created_at: Utc::now(),
        };
        st.keys.push(record.clone());
        Ok(record)
    }

    fn set_key_active(&self, key_id: KeyId, active: bool) -> Result<(), LedgerError> {
        let mut st = self.lock()?;
        let key = st.key_mut(key_id).ok_or(LedgerError::UnknownKey(key_id))?;
        key.is_active = active;
        Ok(())
    }

    fn set_provider_active(&self, name: &str, active: bool) -> Result<(), LedgerError> {
        let mut st = self.lock()?;
        let provider = st
            .provider_mut(name)
            .ok_or_else(|| LedgerError::UnknownProvider(name.to_string()))?;
        provider.is_active = active;
        provider.updated_at = Utc::now();
        Ok(())
    }

    fn delete_provider(&self, name: &str) -> Result<bool, LedgerError> {
        let mut st = self.lock()?;
        let before = st.providers.len();
        st.providers.retain(|p| p.name != name);
        if st.providers.len() == before {
            return Ok(false);
        }
        st.keys.retain(|k| k.provider_name != name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::contract;

    #[test]
    fn satisfies_ledger_contract() {
        contract::run_all(InMemoryLedger::new);
    }

    #[test]
    fn in_memory_ledger_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InMemoryLedger>();
    }
}
