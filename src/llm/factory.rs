//! Name-keyed construction of vendor clients.
//!
//! The orchestrator only knows provider names.  A [`ClientFactory`] turns a
//! name, a freshly decrypted key and a deadline into a boxed
//! [`SpeechAnalyzer`].  The set of names is closed: anything that does not
//! parse as a [`ProviderKind`] is rejected at orchestrator construction.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::client::{ProviderError, SpeechAnalyzer};
use crate::llm::gemini::{GeminiClient, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, GEMINI_PROVIDER};
use crate::llm::openai::{OpenAiClient, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, OPENAI_PROVIDER};

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Vendors with a client implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::OpenAi, ProviderKind::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => OPENAI_PROVIDER,
            ProviderKind::Gemini => GEMINI_PROVIDER,
        }
    }

    fn default_endpoint(&self) -> Endpoint {
        let (base_url, model) = match self {
            ProviderKind::OpenAi => (DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL),
            ProviderKind::Gemini => (DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL),
        };
        Endpoint {
            base_url: base_url.to_string(),
            model: model.to_string(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            OPENAI_PROVIDER => Ok(ProviderKind::OpenAi),
            GEMINI_PROVIDER => Ok(ProviderKind::Gemini),
            other => Err(ProviderError::Unsupported {
                provider: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientFactory trait
// ---------------------------------------------------------------------------

/// Builds one client per attempt.  Clients are never cached because each
/// attempt may use a different key.
pub trait ClientFactory: Send + Sync {
    /// Whether `provider_name` can be built at all.
    fn supports(&self, provider_name: &str) -> bool;

    fn build(
        &self,
        provider_name: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Box<dyn SpeechAnalyzer>, ProviderError>;
}

// Compile-time assertion: Arc<dyn ClientFactory> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ClientFactory>) {}
};

// ---------------------------------------------------------------------------
// VendorClientFactory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    base_url: String,
    model: String,
}

/// Production factory: OpenAI and Gemini, with base URL and model taken from
/// configuration when present.
#[derive(Debug, Clone)]
pub struct VendorClientFactory {
    endpoints: HashMap<ProviderKind, Endpoint>,
}

impl VendorClientFactory {
    /// Factory using the public vendor endpoints and default models.
    pub fn new() -> Self {
        let endpoints = ProviderKind::ALL
            .iter()
            .map(|kind| (*kind, kind.default_endpoint()))
            .collect();
        Self { endpoints }
    }

    /// Factory with per-vendor overrides from `config.providers`.  Blank
    /// fields keep the defaults; settings for unknown vendors are ignored.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut factory = Self::new();
        for settings in &config.providers {
            let Ok(kind) = settings.name.parse::<ProviderKind>() else {
                log::warn!(
                    "factory: no client for configured provider '{}', ignoring",
                    settings.name
                );
                continue;
            };
            if let Some(endpoint) = factory.endpoints.get_mut(&kind) {
                if !settings.base_url.trim().is_empty() {
                    endpoint.base_url = settings.base_url.clone();
                }
                if !settings.model.trim().is_empty() {
                    endpoint.model = settings.model.clone();
                }
            }
        }
        factory
    }

    fn endpoint(&self, kind: ProviderKind) -> Endpoint {
        self.endpoints
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_endpoint())
    }
}

impl Default for VendorClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for VendorClientFactory {
    fn supports(&self, provider_name: &str) -> bool {
        provider_name.parse::<ProviderKind>().is_ok()
    }

    fn build(
        &self,
        provider_name: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Box<dyn SpeechAnalyzer>, ProviderError> {
        let kind: ProviderKind = provider_name.parse()?;
        let Endpoint { base_url, model } = self.endpoint(kind);

        let client: Box<dyn SpeechAnalyzer> = match kind {
            ProviderKind::OpenAi => Box::new(
                OpenAiClient::new(api_key, timeout)
                    .with_base_url(base_url)
                    .with_model(model),
            ),
            ProviderKind::Gemini => Box::new(
                GeminiClient::new(api_key, timeout)
                    .with_base_url(base_url)
                    .with_model(model),
            ),
        };
        Ok(client)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
