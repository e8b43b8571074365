//! Core `SpeechAnalyzer` trait, `ProviderError`, and payload normalization.
//!
//! Every vendor client turns the same inputs into the same
//! [`ProviderAnalysis`]; vendors only differ in how the request is framed and
//! where the JSON payload sits inside their response envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::llm::types::{Feedback, PracticeMode, ProsodyFeatures, ProviderAnalysis, Scores};

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// A vendor call failed.  Every variant names the vendor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Connection, TLS or body transfer failure.
    #[error("{provider}: HTTP request failed: {message}")]
    Request { provider: String, message: String },

    /// The transport gave up waiting for the vendor.
    #[error("{provider}: request timed out")]
    Timeout { provider: String },

    /// The vendor answered with a non-success status.
    #[error("{provider}: HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    /// The response could not be read as the expected JSON shape.
    #[error("{provider}: malformed response: {message}")]
    Parse { provider: String, message: String },

    /// The response envelope carried no analysis text.
    #[error("{provider}: empty response")]
    EmptyResponse { provider: String },

    /// No client implementation exists for this vendor name.
    #[error("{provider}: unsupported provider")]
    Unsupported { provider: String },
}

impl ProviderError {
    /// Vendor the error belongs to.
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Request { provider, .. }
            | ProviderError::Timeout { provider }
            | ProviderError::Status { provider, .. }
            | ProviderError::Parse { provider, .. }
            | ProviderError::EmptyResponse { provider }
            | ProviderError::Unsupported { provider } => provider,
        }
    }

    /// Classify a `reqwest` failure for `provider`.
    pub fn from_reqwest(provider: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
            }
        } else if e.is_decode() {
            ProviderError::Parse {
                provider: provider.to_string(),
                message: e.to_string(),
            }
        } else {
            ProviderError::Request {
                provider: provider.to_string(),
                message: e.to_string(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechAnalyzer trait
// ---------------------------------------------------------------------------

/// Async capability implemented once per AI vendor.
///
/// Implementors are built from a decrypted API key and a call timeout, and
/// must be `Send + Sync` so they can sit behind `Box<dyn SpeechAnalyzer>`.
#[async_trait]
pub trait SpeechAnalyzer: Send + Sync {
    /// Vendor name, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// Deadline the client was configured with.
    fn timeout(&self) -> Duration;

    /// Score one recording.
    ///
    /// `reference_text` is only used when `mode` is
    /// [`PracticeMode::SentencePractice`].  Any vendor-side problem is a
    /// [`ProviderError`]; a partial result is never returned.
    async fn analyze_speech(
        &self,
        transcript: &str,
        prosody: &ProsodyFeatures,
        reference_text: Option<&str>,
        mode: PracticeMode,
    ) -> Result<ProviderAnalysis, ProviderError>;

    /// Cheap availability probe.  Never errors: any failure is `false`.
    async fn health_check(&self) -> bool;
}

// Compile-time assertion: Box<dyn SpeechAnalyzer> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SpeechAnalyzer>) {}
};

// ---------------------------------------------------------------------------
// Payload normalization
// ---------------------------------------------------------------------------

/// The JSON object the prompt asks every vendor to return.
#[derive(Debug, Deserialize)]
struct AnalysisPayload {
    scores: RawScores,
    feedback: Feedback,
}

#[derive(Debug, Deserialize)]
struct RawScores {
    overall: f64,
    pronunciation: f64,
    prosody: f64,
    emotion: f64,
    confidence: f64,
    fluency: f64,
}

/// Parse the analysis JSON text a vendor returned and stamp it with the
/// vendor and model names.
///
/// Markdown code fences around the object are tolerated.  Missing score
/// fields, non-finite scores or a missing `feedback.conversational` are
/// [`ProviderError::Parse`]; finite out-of-range scores are clamped to
/// `[0, 10]`.
pub fn normalize_payload(
    provider: &str,
    model: &str,
    text: &str,
    tokens_used: u64,
) -> Result<ProviderAnalysis, ProviderError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ProviderError::EmptyResponse {
            provider: provider.to_string(),
        });
    }

    let payload: AnalysisPayload =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;

    let raw = payload.scores;
    let scores = Scores {
        overall: raw.overall,
        pronunciation: raw.pronunciation,
        prosody: raw.prosody,
        emotion: raw.emotion,
        confidence: raw.confidence,
        fluency: raw.fluency,
    };
    if let Some((name, _)) = scores.aspects().iter().find(|(_, v)| !v.is_finite()) {
        return Err(ProviderError::Parse {
            provider: provider.to_string(),
            message: format!("score {name} is not a number"),
        });
    }

    Ok(ProviderAnalysis {
        scores: scores.clamped(),
        feedback: payload.feedback,
        provider: provider.to_string(),
        model: model.to_string(),
        tokens_used,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{
        "scores": {"overall": 8.5, "pronunciation": 9.0, "prosody": 7.5,
                   "emotion": 8.0, "confidence": 7.0, "fluency": 9.0},
        "feedback": {
            "conversational": "Bạn nói rất tự nhiên!",
            "detailed": {"pronunciation": "Good /th/", "suggestions": ["Slow down"]}
        }
    }"#;

    #[test]
    fn normalizes_well_formed_payload() {
        let a = normalize_payload("openai", "gpt-4o", GOOD, 412).unwrap();
        assert_eq!(a.provider, "openai");
        assert_eq!(a.model, "gpt-4o");
        assert_eq!(a.tokens_used, 412);
        assert_eq!(a.scores.overall, 8.5);
        assert_eq!(a.feedback.detailed.suggestions, ["Slow down"]);
    }

    #[test]
    fn accepts_fenced_json() {
        let fenced = format!("```json\n{GOOD}\n```");
        assert!(normalize_payload("gemini", "g", &fenced, 0).is_ok());
    }

    #[test]
    fn missing_score_is_parse_error() {
        let partial = r#"{"scores": {"overall": 8.0}, "feedback": {"conversational": "ok"}}"#;
        let err = normalize_payload("openai", "m", partial, 0).unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }), "{err}");
        assert_eq!(err.provider(), "openai");
    }

    #[test]
    fn missing_feedback_is_parse_error() {
        let no_feedback = r#"{"scores": {"overall": 1, "pronunciation": 1, "prosody": 1,
            "emotion": 1, "confidence": 1, "fluency": 1}}"#;
        assert!(matches!(
            normalize_payload("gemini", "m", no_feedback, 0),
            Err(ProviderError::Parse { .. })
        ));
    }

    #[test]
    fn structured_detail_does_not_discard_scores() {
        let extra = r#"{"scores": {"overall": 7, "pronunciation": 7, "prosody": 7,
            "emotion": 7, "confidence": 7, "fluency": 7},
            "feedback": {"conversational": "ok",
                "detailed": {"pronunciation": "fine", "word_errors": ["coffee"]}}}"#;
        let a = normalize_payload("openai", "m", extra, 0).unwrap();
        assert_eq!(a.scores.overall, 7.0);
        assert_eq!(a.feedback.detailed.aspects.len(), 1);
        assert_eq!(a.feedback.detailed.aspects["pronunciation"], "fine");
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let loud = r#"{"scores": {"overall": 12, "pronunciation": -3, "prosody": 5,
            "emotion": 5, "confidence": 5, "fluency": 5},
            "feedback": {"conversational": "ok"}}"#;
        let a = normalize_payload("openai", "m", loud, 0).unwrap();
        assert_eq!(a.scores.overall, 10.0);
        assert_eq!(a.scores.pronunciation, 0.0);
        assert!(a.scores.in_range());
    }

    #[test]
    fn blank_text_is_empty_response() {
        assert_eq!(
            normalize_payload("openai", "m", "  \n", 0).unwrap_err(),
            ProviderError::EmptyResponse {
                provider: "openai".into()
            }
        );
    }

    #[test]
    fn error_display_names_vendor() {
        let err = ProviderError::Status {
            provider: "gemini".into(),
            status: 429,
            body: "quota".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("gemini"), "{msg}");
        assert!(msg.contains("429"), "{msg}");
    }
}
