//! Orchestrator: walks the provider priority chain for one analysis request.
//!
//! # Attempt flow
//!
//! ```text
//! for provider in chain:
//!   ledger.provider(name)        ─ missing / inactive ─▶ Unavailable
//!   ledger.get_available_key     ─ none ──────────────▶ Unavailable
//!   vault.decrypt                ─ error ─────────────▶ Unavailable (logged as error)
//!   factory.build                ─ error ─────────────▶ Unavailable
//!   timeout(client.analyze_speech)
//!     ├─ Ok   → record_success + usage log → Succeeded
//!     └─ Err  → record_failure + usage log → next provider
//! chain exhausted → degraded_response → Degraded
//! ```
//!
//! Ledger errors while choosing a key make the provider unavailable; ledger
//! errors while bookkeeping after a call are logged and otherwise ignored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::ledger::{ApiKeyRecord, KeyLedger, LedgerError, UsageLogEntry};
use crate::llm::{AnalysisRequest, AnalysisResult, ClientFactory, SpeechAnalyzer};
use crate::vault::CredentialVault;

use super::degraded::degraded_response;
use super::state::{AttemptFailure, AttemptOutcome, OrchestratorState};

/// Deadline used when probing health of a provider the ledger does not know.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Configuration problems detected when the orchestrator is built.
///
/// Nothing that happens while serving a request is reported this way:
/// vendor, credential and ledger problems end in the degraded result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("provider priority chain is empty")]
    EmptyChain,

    #[error("provider '{0}' appears more than once in the priority chain")]
    DuplicateProvider(String),

    #[error("no client implementation for provider '{0}'")]
    UnsupportedProvider(String),

    #[error("provider '{0}' has a zero-second call timeout")]
    ZeroTimeout(String),
}

// ---------------------------------------------------------------------------
// ProviderHealth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderHealth {
    Healthy,
    /// Key decrypted, but the vendor probe failed.
    Unhealthy,
    /// No active key (or provider inactive / unregistered).
    NoCredential,
    /// The selected key could not be decrypted.
    CredentialError(String),
}

impl ProviderHealth {
    pub fn label(&self) -> &'static str {
        match self {
            ProviderHealth::Healthy => "healthy",
            ProviderHealth::Unhealthy => "unhealthy",
            ProviderHealth::NoCredential => "no credential",
            ProviderHealth::CredentialError(_) => "credential error",
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Serves analysis requests against an ordered list of vendors.
///
/// Cheap to share: wrap in an `Arc` and call [`analyze_speech`] from as many
/// tasks as needed.  The ledger, vault and factory are injected once at
/// construction.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use reflex_coach::ledger::InMemoryLedger;
/// use reflex_coach::llm::{AnalysisRequest, ProsodyFeatures, VendorClientFactory};
/// use reflex_coach::orchestrator::Orchestrator;
/// use reflex_coach::vault::CredentialVault;
///
/// # async fn example() {
/// let orchestrator = Orchestrator::new(
///     vec!["openai".into(), "gemini".into()],
///     Arc::new(InMemoryLedger::new()),
///     Arc::new(CredentialVault::new("secret")),
///     Arc::new(VendorClientFactory::new()),
/// )
/// .unwrap();
///
/// let request = AnalysisRequest::new("Nice to meet you", ProsodyFeatures::default());
/// let result = orchestrator.analyze_speech(&request).await;
/// println!("{} (degraded: {})", result.provider_used, result.was_degraded);
/// # }
/// ```
///
/// [`analyze_speech`]: Orchestrator::analyze_speech
pub struct Orchestrator {
    chain: Vec<String>,
    ledger: Arc<dyn KeyLedger>,
    vault: Arc<CredentialVault>,
    factory: Arc<dyn ClientFactory>,
}

impl Orchestrator {
    /// Validate the chain and build the orchestrator.
    ///
    /// The chain must be non-empty and free of duplicates. Every name must
    /// be supported by `factory`, and a provider already registered in the
    /// ledger must have a non-zero timeout.
    pub fn new(
        chain: Vec<String>,
        ledger: Arc<dyn KeyLedger>,
        vault: Arc<CredentialVault>,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self, OrchestratorError> {
        if chain.is_empty() {
            return Err(OrchestratorError::EmptyChain);
        }
        let mut seen = HashSet::new();
        for name in &chain {
            if !seen.insert(name.as_str()) {
                return Err(OrchestratorError::DuplicateProvider(name.clone()));
            }
            if !factory.supports(name) {
                return Err(OrchestratorError::UnsupportedProvider(name.clone()));
            }
            match ledger.provider(name) {
                Ok(Some(p)) if p.timeout_seconds == 0 => {
                    return Err(OrchestratorError::ZeroTimeout(name.clone()));
                }
                Ok(_) => {}
                Err(e) => log::warn!("orchestrator: cannot check provider={name}: {e}"),
            }
        }

        log::info!("orchestrator: priority chain = [{}]", chain.join(", "));
        Ok(Self {
            chain,
            ledger,
            vault,
            factory,
        })
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Analyze one recording.  Always returns a result: the first provider
    /// in the chain that answers, or the degraded heuristic.
    pub async fn analyze_speech(&self, request: &AnalysisRequest) -> AnalysisResult {
        let mut state = OrchestratorState::default();

        loop {
            log::debug!(
                "orchestrator: session={} state={}",
                request.session_id,
                state.label()
            );
            state = match state {
                OrchestratorState::Trying(i) if i >= self.chain.len() => {
                    OrchestratorState::Degraded(degraded_response(&request.prosody_features))
                }
                OrchestratorState::Trying(i) => {
                    let name = &self.chain[i];
                    match self.attempt(name, request).await {
                        AttemptOutcome::Success(analysis) => {
                            OrchestratorState::Succeeded(AnalysisResult::from_provider(
                                analysis, name,
                            ))
                        }
                        AttemptOutcome::Failure(failure) => {
                            log::warn!(
                                "orchestrator: provider={name} session={} user={} failed: {failure}",
                                request.session_id,
                                user_label(request)
                            );
                            OrchestratorState::Trying(i + 1)
                        }
                        AttemptOutcome::Unavailable(failure) => {
                            log::info!(
                                "orchestrator: provider={name} session={} user={} skipped: {failure}",
                                request.session_id,
                                user_label(request)
                            );
                            OrchestratorState::Trying(i + 1)
                        }
                    }
                }
                OrchestratorState::Succeeded(result) => {
                    log::info!(
                        "orchestrator: session={} answered by {}",
                        request.session_id,
                        result.provider_used
                    );
                    return result;
                }
                OrchestratorState::Degraded(result) => {
                    log::warn!(
                        "orchestrator: session={} user={} all {} providers failed, returning degraded analysis",
                        request.session_id,
                        user_label(request),
                        self.chain.len()
                    );
                    return result;
                }
            };
        }
    }

    /// Probe every provider in the chain without touching any counters.
    pub async fn health_report(&self) -> Vec<(String, ProviderHealth)> {
        let mut report = Vec::with_capacity(self.chain.len());
        for name in &self.chain {
            let health = self.probe(name).await;
            log::debug!("orchestrator: health provider={name} -> {}", health.label());
            report.push((name.clone(), health));
        }
        report
    }

    // -----------------------------------------------------------------------
    // One attempt
    // -----------------------------------------------------------------------

    async fn attempt(&self, name: &str, request: &AnalysisRequest) -> AttemptOutcome {
        let (key, timeout) = match self.select_key(name) {
            Ok(selected) => selected,
            Err(failure) => return AttemptOutcome::Unavailable(failure),
        };

        let client = match self.client_for(name, &key, timeout) {
            Ok(client) => client,
            Err(failure) => return AttemptOutcome::Unavailable(failure),
        };

        log::debug!(
            "orchestrator: provider={name} key={} ({}) timeout={}s",
            key.id,
            key.key_name,
            timeout.as_secs_f64()
        );

        let started = Instant::now();
        let call = client.analyze_speech(
            &request.transcript,
            &request.prosody_features,
            request.reference_text.as_deref(),
            request.mode,
        );
        let outcome = tokio::time::timeout(timeout, call).await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(analysis)) => {
                self.bookkeep(name, "record_success", || {
                    self.ledger
                        .record_success(key.id, analysis.tokens_used, latency)
                });
                self.log_usage(name, &key, request, analysis.tokens_used, latency, None);
                AttemptOutcome::Success(analysis)
            }
            Ok(Err(e)) => {
                let failure = AttemptFailure::Provider(e);
                self.record_failed_call(name, &key, request, latency, &failure);
                AttemptOutcome::Failure(failure)
            }
            Err(_elapsed) => {
                let failure = AttemptFailure::Timeout(timeout);
                self.record_failed_call(name, &key, request, latency, &failure);
                AttemptOutcome::Failure(failure)
            }
        }
    }

    /// Provider deadline plus the least recently used active key.
    fn select_key(&self, name: &str) -> Result<(ApiKeyRecord, Duration), AttemptFailure> {
        let unavailable = AttemptFailure::CredentialUnavailable;

        let provider = match self.ledger.provider(name) {
            Ok(Some(p)) if p.is_active => p,
            Ok(Some(_)) => return Err(unavailable("provider is inactive".into())),
            Ok(None) => return Err(unavailable("provider is not registered".into())),
            Err(e) => return Err(unavailable(format!("ledger error: {e}"))),
        };

        match self.ledger.get_available_key(name) {
            Ok(Some(key)) => Ok((key, provider.timeout())),
            Ok(None) => Err(unavailable("no active key".into())),
            Err(e) => Err(unavailable(format!("ledger error: {e}"))),
        }
    }

    /// Decrypt `key` and build a client.  Plaintext never outlives the client.
    fn client_for(
        &self,
        name: &str,
        key: &ApiKeyRecord,
        timeout: Duration,
    ) -> Result<Box<dyn SpeechAnalyzer>, AttemptFailure> {
        let plaintext = self.vault.decrypt(&key.api_key_encrypted).map_err(|e| {
            log::error!(
                "orchestrator: provider={name} key={} ({}) cannot be decrypted: {e}",
                key.id,
                key.key_name
            );
            AttemptFailure::DecryptionError(e)
        })?;

        self.factory
            .build(name, plaintext, timeout)
            .map_err(AttemptFailure::Provider)
    }

    async fn probe(&self, name: &str) -> ProviderHealth {
        let key = match self.ledger.get_available_key(name) {
            Ok(Some(key)) => key,
            Ok(None) => return ProviderHealth::NoCredential,
            Err(e) => {
                log::warn!("orchestrator: health provider={name} ledger error: {e}");
                return ProviderHealth::NoCredential;
            }
        };
        let timeout = self
            .ledger
            .provider(name)
            .ok()
            .flatten()
            .map(|p| p.timeout())
            .unwrap_or(DEFAULT_TIMEOUT);

        match self.client_for(name, &key, timeout) {
            Ok(client) => match tokio::time::timeout(timeout, client.health_check()).await {
                Ok(true) => ProviderHealth::Healthy,
                _ => ProviderHealth::Unhealthy,
            },
            Err(AttemptFailure::DecryptionError(e)) => ProviderHealth::CredentialError(e.to_string()),
            Err(_) => ProviderHealth::Unhealthy,
        }
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn record_failed_call(
        &self,
        name: &str,
        key: &ApiKeyRecord,
        request: &AnalysisRequest,
        latency: Duration,
        failure: &AttemptFailure,
    ) {
        let message = failure.to_string();
        self.bookkeep(name, "record_failure", || {
            self.ledger.record_failure(key.id, &message)
        });
        self.log_usage(name, key, request, 0, latency, Some(message));
    }

    fn log_usage(
        &self,
        name: &str,
        key: &ApiKeyRecord,
        request: &AnalysisRequest,
        total_tokens: u64,
        latency: Duration,
        error_message: Option<String>,
    ) {
        let entry = UsageLogEntry {
            provider_name: name.to_string(),
            api_key_id: Some(key.id),
            session_id: request.session_id.clone(),
            total_tokens,
            latency_ms: latency.as_secs_f64() * 1000.0,
            success: error_message.is_none(),
            error_message,
            created_at: Utc::now(),
        };
        self.bookkeep(name, "log_usage", || self.ledger.log_usage(&entry));
    }

    fn bookkeep(&self, name: &str, what: &str, op: impl FnOnce() -> Result<(), LedgerError>) {
        if let Err(e) = op() {
            log::warn!("orchestrator: provider={name} {what} failed: {e}");
        }
    }
}

fn user_label(request: &AnalysisRequest) -> &str {
    request.user_id.as_deref().unwrap_or("-")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::ledger::{InMemoryLedger, KeyId, NewProvider, ProviderConfig};
    use crate::llm::{
        Feedback, PitchStats, PracticeMode, ProsodyFeatures, ProviderAnalysis, ProviderError,
        Scores, SpeakingRate,
    };

    const SECRET: &str = "unit-test-secret";

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Clone, Copy)]
    enum Script {
        Answer,
        Fail,
        Hang,
    }

    /// What a scripted client saw.
    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        provider: String,
        api_key: String,
        reference: Option<String>,
        mode: PracticeMode,
    }

    struct ScriptedClient {
        name: String,
        api_key: String,
        timeout: Duration,
        script: Script,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    #[async_trait]
    impl SpeechAnalyzer for ScriptedClient {
        fn name(&self) -> &str {
            &self.name
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        async fn analyze_speech(
            &self,
            _transcript: &str,
            _prosody: &ProsodyFeatures,
            reference_text: Option<&str>,
            mode: PracticeMode,
        ) -> Result<ProviderAnalysis, ProviderError> {
            self.calls.lock().unwrap().push(Call {
                provider: self.name.clone(),
                api_key: self.api_key.clone(),
                reference: reference_text.map(str::to_string),
                mode,
            });
            match self.script {
                Script::Answer => Ok(ProviderAnalysis {
                    scores: Scores {
                        overall: 8.0,
                        pronunciation: 8.5,
                        prosody: 7.5,
                        emotion: 8.0,
                        confidence: 7.0,
                        fluency: 9.0,
                    },
                    feedback: Feedback {
                        conversational: format!("Tốt lắm ({})", self.name),
                        detailed: Default::default(),
                    },
                    provider: self.name.clone(),
                    model: format!("{}-model", self.name),
                    tokens_used: 321,
                }),
                Script::Fail => Err(ProviderError::Status {
                    provider: self.name.clone(),
                    status: 503,
                    body: "overloaded".into(),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ProviderError::Timeout {
                        provider: self.name.clone(),
                    })
                }
            }
        }

        async fn health_check(&self) -> bool {
            matches!(self.script, Script::Answer)
        }
    }

    struct ScriptedFactory {
        scripts: HashMap<String, Script>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl ScriptedFactory {
        fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ClientFactory for ScriptedFactory {
        fn supports(&self, provider_name: &str) -> bool {
            self.scripts.contains_key(provider_name)
        }

        fn build(
            &self,
            provider_name: &str,
            api_key: String,
            timeout: Duration,
        ) -> Result<Box<dyn SpeechAnalyzer>, ProviderError> {
            let script = *self
                .scripts
                .get(provider_name)
                .ok_or_else(|| ProviderError::Unsupported {
                    provider: provider_name.to_string(),
                })?;
            Ok(Box::new(ScriptedClient {
                name: provider_name.to_string(),
                api_key,
                timeout,
                script,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    /// Ledger whose storage is gone.
    struct BrokenLedger;

    impl KeyLedger for BrokenLedger {
        fn get_available_key(&self, _: &str) -> Result<Option<ApiKeyRecord>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn record_success(&self, _: KeyId, _: u64, _: Duration) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn record_failure(&self, _: KeyId, _: &str) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn log_usage(&self, _: &UsageLogEntry) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn provider(&self, _: &str) -> Result<Option<ProviderConfig>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn list_providers(&self) -> Result<Vec<ProviderConfig>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn key(&self, _: KeyId) -> Result<Option<ApiKeyRecord>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn list_keys(&self, _: &str) -> Result<Vec<ApiKeyRecord>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn usage_for_session(&self, _: &str) -> Result<Vec<UsageLogEntry>, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn upsert_provider(&self, _: &NewProvider) -> Result<ProviderConfig, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn add_key(&self, _: &str, _: &str, _: &str) -> Result<ApiKeyRecord, LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn set_key_active(&self, _: KeyId, _: bool) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn set_provider_active(&self, _: &str, _: bool) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }
        fn delete_provider(&self, _: &str) -> Result<bool, LedgerError> {
            Err(LedgerError::Poisoned)
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        vault: Arc<CredentialVault>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ledger: Arc::new(InMemoryLedger::new()),
                vault: Arc::new(CredentialVault::new(SECRET)),
            }
        }

        fn provider(&self, name: &str, priority: i32) -> &Self {
            self.ledger
                .upsert_provider(&NewProvider::new(name, priority))
                .unwrap();
            self
        }

        fn key(&self, provider: &str, label: &str, plaintext: &str) -> KeyId {
            let sealed = self.vault.encrypt(plaintext).unwrap();
            self.ledger.add_key(provider, label, &sealed).unwrap().id
        }

        fn orchestrator(&self, chain: &[&str], factory: Arc<ScriptedFactory>) -> Orchestrator {
            Orchestrator::new(
                chain.iter().map(|s| s.to_string()).collect(),
                self.ledger.clone(),
                self.vault.clone(),
                factory,
            )
            .unwrap()
        }

        fn record(&self, id: KeyId) -> ApiKeyRecord {
            self.ledger.key(id).unwrap().unwrap()
        }
    }

    fn request() -> AnalysisRequest {
        let prosody = ProsodyFeatures {
            pitch: PitchStats {
                mean: 180.0,
                std: 25.0,
            },
            speaking_rate: SpeakingRate {
                syllables_per_second: 3.0,
                total_syllables: 15,
            },
            ..Default::default()
        };
        AnalysisRequest::new("I would like a cup of coffee", prosody).with_session("sess-1")
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn rejects_invalid_chains() {
        let fx = Fixture::new();
        let factory = Arc::new(ScriptedFactory::new(&[("openai", Script::Answer)]));
        let build = |chain: Vec<&str>| {
            Orchestrator::new(
                chain.into_iter().map(String::from).collect(),
                fx.ledger.clone(),
                fx.vault.clone(),
                factory.clone(),
            )
            .err()
        };

        assert_eq!(build(vec![]), Some(OrchestratorError::EmptyChain));
        assert_eq!(
            build(vec!["openai", "openai"]),
            Some(OrchestratorError::DuplicateProvider("openai".into()))
        );
        assert_eq!(
            build(vec!["openai", "claude"]),
            Some(OrchestratorError::UnsupportedProvider("claude".into()))
        );
        assert_eq!(build(vec!["openai"]), None);
    }

    #[test]
    fn log_lines_name_the_user_when_known() {
        let anonymous = request();
        assert_eq!(user_label(&anonymous), "-");

        let mut known = request();
        known.user_id = Some("42".into());
        assert_eq!(user_label(&known), "42");
    }

    // -----------------------------------------------------------------------
    // Fallback
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn first_provider_success_touches_only_its_key() {
        let fx = Fixture::new();
        fx.provider("openai", 1).provider("gemini", 2);
        let a = fx.key("openai", "a", "sk-a");
        let b = fx.key("gemini", "b", "g-b");
        let factory = Arc::new(ScriptedFactory::new(&[
            ("openai", Script::Answer),
            ("gemini", Script::Answer),
        ]));

        let result = fx
            .orchestrator(&["openai", "gemini"], factory.clone())
            .analyze_speech(&request())
            .await;

        assert_eq!(result.provider_used, "openai");
        assert!(!result.was_degraded);
        assert_eq!(result.model.as_deref(), Some("openai-model"));
        assert_eq!(fx.record(a).request_count, 1);
        assert!(fx.record(a).last_used_at.is_some());
        assert_eq!(fx.record(b).request_count, 0);
        assert_eq!(factory.calls().len(), 1);
        assert_eq!(factory.calls()[0].api_key, "sk-a");
    }

    #[tokio::test]
    async fn falls_back_to_next_provider_with_exact_ledger_updates() {
        let fx = Fixture::new();
        fx.provider("openai", 1).provider("gemini", 2);
        let a = fx.key("openai", "a", "sk-a");
        let b = fx.key("gemini", "b", "g-b");
        let factory = Arc::new(ScriptedFactory::new(&[
            ("openai", Script::Fail),
            ("gemini", Script::Answer),
        ]));

        let result = fx
            .orchestrator(&["openai", "gemini"], factory.clone())
            .analyze_speech(&request())
            .await;

        assert_eq!(result.provider_used, "gemini");
        assert!(!result.was_degraded);

        let a = fx.record(a);
        assert_eq!((a.request_count, a.failure_count), (0, 1));
        assert!(a.last_failure_at.is_some());
        assert!(a.last_used_at.is_none());

        let b = fx.record(b);
        assert_eq!((b.request_count, b.failure_count), (1, 0));
        assert!(b.last_used_at.is_some());

        let usage = fx.ledger.usage_for_session("sess-1").unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].provider_name, "openai");
        assert!(!usage[0].success);
        assert!(usage[0].error_message.as_deref().unwrap().contains("503"));
        assert_eq!(usage[1].provider_name, "gemini");
        assert!(usage[1].success);
        assert_eq!(usage[1].total_tokens, 321);
    }

    #[tokio::test]
    async fn all_failures_degrade_with_valid_result() {
        let fx = Fixture::new();
        fx.provider("openai", 1).provider("gemini", 2);
        let a = fx.key("openai", "a", "sk-a");
        let b = fx.key("gemini", "b", "g-b");
        let factory = Arc::new(ScriptedFactory::new(&[
            ("openai", Script::Fail),
            ("gemini", Script::Fail),
        ]));

        let result = fx
            .orchestrator(&["openai", "gemini"], factory.clone())
            .analyze_speech(&request())
            .await;

        assert!(result.was_degraded);
        assert_eq!(result.provider_used, "degraded");
        assert!(result.scores.in_range());
        assert!(!result.feedback.conversational.is_empty());
        assert_eq!(fx.record(a).failure_count, 1);
        assert_eq!(fx.record(b).failure_count, 1);
        // Each provider tried exactly once.
        let tried: Vec<_> = factory.calls().into_iter().map(|c| c.provider).collect();
        assert_eq!(tried, ["openai", "gemini"]);
    }

    #[tokio::test]
    async fn provider_without_key_is_skipped_silently() {
        let fx = Fixture::new();
        fx.provider("openai", 1).provider("gemini", 2);
        let b = fx.key("gemini", "b", "g-b");
        let factory = Arc::new(ScriptedFactory::new(&[
            ("openai", Script::Answer),
            ("gemini", Script::Answer),
        ]));

        let result = fx
            .orchestrator(&["openai", "gemini"], factory.clone())
            .analyze_speech(&request())
            .await;

        assert_eq!(result.provider_used, "gemini");
        assert_eq!(fx.record(b).request_count, 1);
        assert_eq!(factory.calls().len(), 1);
        let usage = fx.ledger.usage_for_session("sess-1").unwrap();
        assert_eq!(usage.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_and_inactive_providers_are_skipped() {
        let fx = Fixture::new();
        fx.provider("openai", 1);
        fx.key("openai", "a", "sk-a");
        fx.ledger.set_provider_active("openai", false).unwrap();
        let factory = Arc::new(ScriptedFactory::new(&[
            ("openai", Script::Answer),
            ("gemini", Script::Answer),
        ]));

        // gemini has no ledger row at all
        let result = fx
            .orchestrator(&["openai", "gemini"], factory.clone())
            .analyze_speech(&request())
            .await;

        assert!(result.was_degraded);
        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn single_provider_timeout_degrades_and_records_failure() {
        let fx = Fixture::new();
        fx.ledger
            .upsert_provider(&NewProvider::new("openai", 1).with_timeout_secs(1))
            .unwrap();
        let a = fx.key("openai", "a", "sk-a");
        let factory = Arc::new(ScriptedFactory::new(&[("openai", Script::Hang)]));

        let started = Instant::now();
        let result = fx
            .orchestrator(&["openai"], factory)
            .analyze_speech(&request())
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.was_degraded);
        assert!(result.scores.in_range());
        let a = fx.record(a);
        assert_eq!(a.failure_count, 1);
        assert_eq!(a.request_count, 0);
        let usage = fx.ledger.usage_for_session("sess-1").unwrap();
        assert!(usage[0].error_message.as_deref().unwrap().contains("no answer within"));
    }

    #[tokio::test]
    async fn undecryptable_key_skips_without_recording_failure() {
        let fx = Fixture::new();
        fx.provider("openai", 1).provider("gemini", 2);
        let other_vault = CredentialVault::new("some other secret");
        let sealed = other_vault.encrypt("sk-a").unwrap();
        let a = fx.ledger.add_key("openai", "a", &sealed).unwrap().id;
        fx.key("gemini", "b", "g-b");
        let factory = Arc::new(ScriptedFactory::new(&[
            ("openai", Script::Answer),
            ("gemini", Script::Answer),
        ]));

        let result = fx
            .orchestrator(&["openai", "gemini"], factory.clone())
            .analyze_speech(&request())
            .await;

        assert_eq!(result.provider_used, "gemini");
        let a = fx.record(a);
        assert_eq!((a.request_count, a.failure_count), (0, 0));
        assert!(factory.calls().iter().all(|c| c.provider == "gemini"));
    }

    #[tokio::test]
    async fn broken_ledger_degrades_without_calling_vendors() {
        let factory = Arc::new(ScriptedFactory::new(&[("openai", Script::Answer)]));
        let orchestrator = Orchestrator::new(
            vec!["openai".into()],
            Arc::new(BrokenLedger),
            Arc::new(CredentialVault::new(SECRET)),
            factory.clone(),
        )
        .unwrap();

        let result = orchestrator.analyze_speech(&request()).await;
        assert!(result.was_degraded);
        assert!(factory.calls().is_empty());
    }

    // -----------------------------------------------------------------------
    // Rotation and request passthrough
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn consecutive_requests_rotate_keys() {
        let fx = Fixture::new();
        fx.provider("gemini", 1);
        fx.key("gemini", "one", "g-1");
        fx.key("gemini", "two", "g-2");
        let factory = Arc::new(ScriptedFactory::new(&[("gemini", Script::Answer)]));
        let orchestrator = fx.orchestrator(&["gemini"], factory.clone());

        for _ in 0..3 {
            orchestrator.analyze_speech(&request()).await;
        }

        let keys: Vec<_> = factory.calls().into_iter().map(|c| c.api_key).collect();
        assert_eq!(keys, ["g-1", "g-2", "g-1"]);
    }

    #[tokio::test]
    async fn reference_and_mode_reach_the_client() {
        let fx = Fixture::new();
        fx.provider("openai", 1);
        fx.key("openai", "a", "sk-a");
        let factory = Arc::new(ScriptedFactory::new(&[("openai", Script::Answer)]));
        let orchestrator = fx.orchestrator(&["openai"], factory.clone());

        let req = request()
            .with_reference("I'd like a cup of coffee")
            .with_mode(PracticeMode::SentencePractice);
        orchestrator.analyze_speech(&req).await;

        let call = &factory.calls()[0];
        assert_eq!(call.reference.as_deref(), Some("I'd like a cup of coffee"));
        assert_eq!(call.mode, PracticeMode::SentencePractice);
    }

    #[tokio::test]
    async fn concurrent_requests_all_complete() {
        let fx = Fixture::new();
        fx.provider("openai", 1);
        fx.key("openai", "a", "sk-a");
        fx.key("openai", "b", "sk-b");
        let factory = Arc::new(ScriptedFactory::new(&[("openai", Script::Answer)]));
        let orchestrator = Arc::new(fx.orchestrator(&["openai"], factory.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orc = Arc::clone(&orchestrator);
                tokio::spawn(async move { orc.analyze_speech(&request()).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().provider_used, "openai");
        }

        let total: u64 = fx
            .ledger
            .list_keys("openai")
            .unwrap()
            .iter()
            .map(|k| k.request_count)
            .sum();
        assert_eq!(total, 8);
    }

    // -----------------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn health_report_classifies_each_provider() {
        let fx = Fixture::new();
        for (i, name) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
            fx.provider(name, i as i32);
        }
        fx.key("alpha", "k", "a");
        fx.key("beta", "k", "b");
        let foreign = CredentialVault::new("other").encrypt("d").unwrap();
        fx.ledger.add_key("delta", "k", &foreign).unwrap();

        let factory = Arc::new(ScriptedFactory::new(&[
            ("alpha", Script::Answer),
            ("beta", Script::Fail),
            ("gamma", Script::Answer),
            ("delta", Script::Answer),
        ]));
        let orchestrator = fx.orchestrator(&["alpha", "beta", "gamma", "delta"], factory.clone());

        let report: HashMap<_, _> = orchestrator.health_report().await.into_iter().collect();
        assert_eq!(report["alpha"], ProviderHealth::Healthy);
        assert_eq!(report["beta"], ProviderHealth::Unhealthy);
        assert_eq!(report["gamma"], ProviderHealth::NoCredential);
        assert!(matches!(report["delta"], ProviderHealth::CredentialError(_)));

        // Probing never touches counters.
        for key in fx.ledger.list_keys("alpha").unwrap() {
            assert_eq!((key.request_count, key.failure_count), (0, 0));
        }
        assert!(factory.calls().is_empty());
    }

    #[test]
    fn orchestrator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Orchestrator>();
    }
}
