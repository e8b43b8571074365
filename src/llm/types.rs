//! Request and result shapes shared by every provider and the orchestrator.
//!
//! All types derive `Serialize` / `Deserialize`; their JSON form is the call
//! shape the surrounding session layer exchanges with this crate:
//!
//! ```json
//! {
//!   "transcript": "I would like a coffee",
//!   "prosody_features": {
//!     "pitch": { "mean": 182.4, "std": 21.0 },
//!     "speaking_rate": { "syllables_per_second": 3.4, "total_syllables": 17 },
//!     "energy": { "mean": 0.41, "max": 0.93 }
//!   },
//!   "reference_text": "I would like a cup of coffee",
//!   "mode": "sentence_practice",
//!   "session_id": "c0ffee",
//!   "user_id": "42"
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inclusive upper bound of every score.
pub const MAX_SCORE: f64 = 10.0;

// ---------------------------------------------------------------------------
// PracticeMode
// ---------------------------------------------------------------------------

/// Which practice screen produced the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    /// Free conversation; there is no reference sentence.
    #[default]
    Conversation,
    /// The trainee reads back a given sentence.
    SentencePractice,
}

impl PracticeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeMode::Conversation => "conversation",
            PracticeMode::SentencePractice => "sentence_practice",
        }
    }
}

impl fmt::Display for PracticeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PracticeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conversation" => Ok(PracticeMode::Conversation),
            "sentence_practice" => Ok(PracticeMode::SentencePractice),
            other => Err(format!("unknown practice mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ProsodyFeatures
// ---------------------------------------------------------------------------

/// Fundamental frequency statistics in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchStats {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakingRate {
    pub syllables_per_second: f64,
    pub total_syllables: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyStats {
    pub mean: f64,
    pub max: f64,
}

/// Summary of a recording produced by the upstream feature extractor.
///
/// Absent sections deserialize as zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProsodyFeatures {
    pub pitch: PitchStats,
    pub speaking_rate: SpeakingRate,
    pub energy: EnergyStats,
}

// ---------------------------------------------------------------------------
// AnalysisRequest
// ---------------------------------------------------------------------------

/// One speech-analysis call as issued by the session layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub transcript: String,
    #[serde(default)]
    pub prosody_features: ProsodyFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
    #[serde(default)]
    pub mode: PracticeMode,
    /// Correlation id, used for logging and the usage log only.
    #[serde(default)]
    pub session_id: String,
    /// Opaque user identifier, used for logging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(transcript: impl Into<String>, prosody_features: ProsodyFeatures) -> Self {
        Self {
            transcript: transcript.into(),
            prosody_features,
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_text = Some(reference.into());
        self
    }

    pub fn with_mode(mut self, mode: PracticeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Scores / Feedback
// ---------------------------------------------------------------------------

/// The six scored aspects, each within `0.0..=10.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub overall: f64,
    pub pronunciation: f64,
    pub prosody: f64,
    pub emotion: f64,
    pub confidence: f64,
    pub fluency: f64,
}

impl Scores {
    /// Every aspect, in declaration order, with its JSON name.
    pub fn aspects(&self) -> [(&'static str, f64); 6] {
        [
            ("overall", self.overall),
            ("pronunciation", self.pronunciation),
            ("prosody", self.prosody),
            ("emotion", self.emotion),
            ("confidence", self.confidence),
            ("fluency", self.fluency),
        ]
    }

    /// `true` when every aspect is finite and inside `[0, 10]`.
    pub fn in_range(&self) -> bool {
        self.aspects()
            .iter()
            .all(|(_, v)| v.is_finite() && (0.0..=MAX_SCORE).contains(v))
    }

    /// Copy with every aspect clamped into `[0, 10]`.
    pub fn clamped(self) -> Self {
        let c = |v: f64| v.clamp(0.0, MAX_SCORE);
        Self {
            overall: c(self.overall),
            pronunciation: c(self.pronunciation),
            prosody: c(self.prosody),
            emotion: c(self.emotion),
            confidence: c(self.confidence),
            fluency: c(self.fluency),
        }
    }
}

/// Per-aspect commentary plus improvement suggestions.
///
/// Aspect names (`pronunciation`, `prosody`, `emotion`, …) are free-form
/// keys next to the `suggestions` list.  Vendors sometimes add structured
/// extras (word lists, nested objects); those are dropped on input, keeping
/// only text commentary and text suggestions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<BTreeMap<String, serde_json::Value>>")]
pub struct DetailedFeedback {
    #[serde(flatten)]
    pub aspects: BTreeMap<String, String>,
    pub suggestions: Vec<String>,
}

impl From<Option<BTreeMap<String, serde_json::Value>>> for DetailedFeedback {
    fn from(raw: Option<BTreeMap<String, serde_json::Value>>) -> Self {
        let mut detailed = DetailedFeedback::default();
        for (key, value) in raw.unwrap_or_default() {
            match (key.as_str(), value) {
                ("suggestions", serde_json::Value::Array(items)) => {
                    detailed.suggestions = items
                        .into_iter()
                        .filter_map(|item| match item {
                            serde_json::Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect();
                }
                ("suggestions", _) => {}
                (_, serde_json::Value::String(text)) => {
                    detailed.aspects.insert(key, text);
                }
                (_, other) => log::debug!("llm: ignoring non-text detailed feedback '{key}': {other}"),
            }
        }
        detailed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Short, friendly message addressed to the trainee (Vietnamese).
    pub conversational: String,
    #[serde(default)]
    pub detailed: DetailedFeedback,
}

// ---------------------------------------------------------------------------
// ProviderAnalysis / AnalysisResult
// ---------------------------------------------------------------------------

/// Normalized answer of one vendor, before orchestration metadata is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAnalysis {
    pub scores: Scores,
    pub feedback: Feedback,
    /// Vendor that produced the answer.
    pub provider: String,
    /// Model / version string that was called.
    pub model: String,
    /// Tokens billed for the call, when the vendor reports it.
    #[serde(default)]
    pub tokens_used: u64,
}

/// What the caller of the orchestrator receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub scores: Scores,
    pub feedback: Feedback,
    /// Vendor name, or [`DEGRADED_PROVIDER`](crate::orchestrator::DEGRADED_PROVIDER).
    pub provider_used: String,
    pub was_degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AnalysisResult {
    /// Wrap a vendor answer produced by provider `provider_used`.
    pub fn from_provider(analysis: ProviderAnalysis, provider_used: &str) -> Self {
        Self {
            scores: analysis.scores,
            feedback: analysis.feedback,
            provider_used: provider_used.to_string(),
            was_degraded: false,
            model: Some(analysis.model),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
