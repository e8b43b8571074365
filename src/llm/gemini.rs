//! Google Gemini `generateContent` client.
//!
//! The API key travels in the `x-goog-api-key` header rather than the query
//! string so it never shows up in request logs.

use std::time::Duration;

use async_trait::async_trait;

use crate::llm::client::{normalize_payload, ProviderError, SpeechAnalyzer};
use crate::llm::prompt::AnalysisPromptBuilder;
use crate::llm::types::{PracticeMode, ProsodyFeatures, ProviderAnalysis};

pub const GEMINI_PROVIDER: &str = "gemini";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            timeout,
        }
    }

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

    fn model_url(&self) -> String {
        format!("{}/v1beta/models/{}", self.base_url, self.model)
    }
}

#[async_trait]
impl SpeechAnalyzer for GeminiClient {
    fn name(&self) -> &str {
        GEMINI_PROVIDER
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
        let prompt = AnalysisPromptBuilder::new(transcript, prosody)
            .reference(reference_text, mode)
            .build();

        let url = format!("{}:generateContent", self.model_url());
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(GEMINI_PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: GEMINI_PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(GEMINI_PROVIDER, e))?;

        let text = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: GEMINI_PROVIDER.to_string(),
            })?;
        let tokens_used = json["usageMetadata"]["totalTokenCount"]
            .as_u64()
            .unwrap_or(0);

        normalize_payload(GEMINI_PROVIDER, &self.model, text, tokens_used)
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.model_url())
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::debug!("gemini: health check failed: {e}");
                false
            }
        }
    }
}
