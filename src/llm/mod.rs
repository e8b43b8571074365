//! Speech-analysis vendor clients.
//!
//! This module provides:
//! * [`SpeechAnalyzer`]: async trait implemented by every vendor client.
//! * [`OpenAiClient`] / [`GeminiClient`]: the two REST backends.
//! * [`ClientFactory`] / [`VendorClientFactory`]: name → client construction.
//! * [`AnalysisPromptBuilder`]: builds the analysis prompt for both vendors.
//! * [`ProviderError`]: error variants for a single vendor call.
//! * Request / result types shared with the orchestrator (`types`).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use reflex_coach::llm::{OpenAiClient, PracticeMode, ProsodyFeatures, SpeechAnalyzer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = OpenAiClient::new("sk-...", Duration::from_secs(60));
//!     let analysis = client
//!         .analyze_speech("I would like a coffee", &ProsodyFeatures::default(), None, PracticeMode::Conversation)
//!         .await
//!         .unwrap();
//!     println!("{}", analysis.feedback.conversational);
//! }
//! ```

pub mod client;
pub mod factory;
pub mod gemini;
pub mod openai;
pub mod prompt;
pub mod types;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use client::{normalize_payload, ProviderError, SpeechAnalyzer};
pub use factory::{ClientFactory, ProviderKind, VendorClientFactory};
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use prompt::AnalysisPromptBuilder;
pub use types::{
    AnalysisRequest, AnalysisResult, DetailedFeedback, EnergyStats, Feedback, PitchStats,
    PracticeMode, ProsodyFeatures, ProviderAnalysis, Scores, SpeakingRate, MAX_SCORE,
};
