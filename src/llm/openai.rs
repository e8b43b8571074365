//! OpenAI chat-completions client.
//!
//! Speaks `POST {base_url}/v1/chat/completions` with `response_format`
//! forced to a JSON object, and probes health with `GET {base_url}/v1/models`.

use std::time::Duration;

use async_trait::async_trait;

use crate::llm::client::{normalize_payload, ProviderError, SpeechAnalyzer};
use crate::llm::prompt::AnalysisPromptBuilder;
use crate::llm::types::{PracticeMode, ProsodyFeatures, ProviderAnalysis};

pub const OPENAI_PROVIDER: &str = "openai";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const TEMPERATURE: f32 = 0.7;

/// One OpenAI client per decrypted key.  The HTTP client carries the call
/// timeout, so a hung vendor surfaces as [`ProviderError::Timeout`].
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            timeout,
        }
    }

    /// Point the client at another host (trailing `/` is ignored).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl SpeechAnalyzer for OpenAiClient {
    fn name(&self) -> &str {
        OPENAI_PROVIDER
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn analyze_speech(
        &self,
        transcript: &str,
        prosody: &ProsodyFeatures,
        reference_text: Option<&str>,
        mode: PracticeMode,
    ) -> Result<ProviderAnalysis, ProviderError> {
        let (system_msg, user_msg) = AnalysisPromptBuilder::new(transcript, prosody)
            .reference(reference_text, mode)
            .build_chat();

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_msg },
                { "role": "user",   "content": user_msg   }
            ],
            "temperature": TEMPERATURE,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(OPENAI_PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: OPENAI_PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(OPENAI_PROVIDER, e))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: OPENAI_PROVIDER.to_string(),
            })?;
        let tokens_used = json["usage"]["total_tokens"].as_u64().unwrap_or(0);

        normalize_payload(OPENAI_PROVIDER, &self.model, content, tokens_used)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("openai: health check failed: {e}");
                false
            }
        }
    }
}
