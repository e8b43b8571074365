//! Prompt builder for speech-analysis requests.
//!
//! [`AnalysisPromptBuilder`] constructs two kinds of prompts:
//! * **Flat** (`build`): one self-contained string, for Gemini
//!   `generateContent`.
//! * **Chat** (`build_chat`): `(system_msg, user_msg)` tuple for OpenAI
//!   `/v1/chat/completions`.
//!
//! Both embed the transcript, the reference sentence (sentence practice
//! only), the headline prosody metrics and the JSON schema the vendor must
//! answer with.

use crate::llm::types::{PracticeMode, ProsodyFeatures};

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// Persona for chat-style vendors.  Feedback is addressed to Vietnamese
/// learners of English.
const SYSTEM_INSTRUCTION: &str = "\
You are an expert English speech coach specializing in prosody and emotion analysis.
Analyze speech recordings and provide detailed feedback on pronunciation, prosody (intonation, rhythm, stress),
emotion expression, confidence, and fluency.

Provide scores from 0-10 for each aspect and conversational feedback in Vietnamese.
Be encouraging but honest about areas for improvement.";

/// Opening line of the flat prompt, which has no separate system role.
const FLAT_PREAMBLE: &str = "You are an expert English speech coach. Analyze this speech recording:";

/// Scored aspects, spelled out for the flat prompt.
const ASPECT_LIST: &str = "\
Provide detailed analysis with scores (0-10) for:
1. Overall quality
2. Pronunciation accuracy
3. Prosody (intonation, rhythm, stress)
4. Emotional expression
5. Confidence in delivery
6. Fluency
";

/// Expected answer shape.  Must stay in sync with `client::AnalysisPayload`.
const RESPONSE_SCHEMA: &str = r#"{
  "scores": {
    "overall": 8.5,
    "pronunciation": 9.0,
    "prosody": 7.5,
    "emotion": 8.0,
    "confidence": 7.0,
    "fluency": 9.0
  },
  "feedback": {
    "conversational": "Feedback in Vietnamese for the user...",
    "detailed": {
      "pronunciation": "Specific pronunciation feedback...",
      "prosody": "Intonation and rhythm feedback...",
      "emotion": "Emotional expression feedback...",
      "suggestions": ["Suggestion 1", "Suggestion 2"]
    }
  }
}"#;

// ---------------------------------------------------------------------------
// AnalysisPromptBuilder
// ---------------------------------------------------------------------------

/// Builds speech-analysis prompts in either flat or chat-message format.
///
/// # Example
/// ```rust
/// use reflex_coach::llm::{AnalysisPromptBuilder, PracticeMode, ProsodyFeatures};
///
/// let prosody = ProsodyFeatures::default();
/// let (system, user) = AnalysisPromptBuilder::new("Hello there", &prosody)
///     .reference(Some("Hello there!"), PracticeMode::SentencePractice)
///     .build_chat();
/// assert!(system.contains("speech coach"));
/// assert!(user.contains("Reference text: \"Hello there!\""));
/// ```
pub struct AnalysisPromptBuilder<'a> {
    transcript: &'a str,
    prosody: &'a ProsodyFeatures,
    reference: Option<&'a str>,
}

impl<'a> AnalysisPromptBuilder<'a> {
    pub fn new(transcript: &'a str, prosody: &'a ProsodyFeatures) -> Self {
        Self {
            transcript,
            prosody,
            reference: None,
        }
    }

    /// Attach the reference sentence.  It is kept only in sentence practice
    /// and only when non-blank; in conversation mode it is dropped.
    pub fn reference(mut self, reference: Option<&'a str>, mode: PracticeMode) -> Self {
        self.reference = match mode {
            PracticeMode::SentencePractice => reference.filter(|r| !r.trim().is_empty()),
            PracticeMode::Conversation => None,
        };
        self
    }

    /// Build a **flat** prompt string (Gemini).
    ///
    /// Structure (in order):
    /// 1. Preamble
    /// 2. Transcript (+ reference)
    /// 3. Prosody metrics
    /// 4. Aspect list and JSON schema
    pub fn build(&self) -> String {
        let mut prompt = String::with_capacity(1536);
        prompt.push_str(FLAT_PREAMBLE);
        prompt.push_str("\n\n");
        self.push_speech(&mut prompt);
        prompt.push_str("\nProsody analysis:\n");
        self.push_metrics(&mut prompt);
        prompt.push('\n');
        prompt.push_str(ASPECT_LIST);
        prompt.push_str("\nReturn your analysis as JSON:\n");
        prompt.push_str(RESPONSE_SCHEMA);
        prompt.push('\n');
        prompt
    }

    /// Build a **(system_msg, user_msg)** pair (OpenAI).
    pub fn build_chat(&self) -> (String, String) {
        let mut user = String::with_capacity(1024);
        user.push_str("Analyze this English speech:\n\n");
        self.push_speech(&mut user);
        user.push_str("\nProsody metrics:\n");
        self.push_metrics(&mut user);
        user.push_str("\nReturn a JSON object with this structure:\n");
        user.push_str(RESPONSE_SCHEMA);
        user.push('\n');

        (SYSTEM_INSTRUCTION.to_string(), user)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn push_speech(&self, out: &mut String) {
        out.push_str(&format!("Transcript: \"{}\"\n", self.transcript));
        if let Some(reference) = self.reference {
            out.push_str(&format!("Reference text: \"{reference}\"\n"));
        }
    }

    fn push_metrics(&self, out: &mut String) {
        out.push_str(&format!(
            "- Average pitch: {:.1} Hz\n- Speaking rate: {:.2} syllables/second\n",
            self.prosody.pitch.mean, self.prosody.speaking_rate.syllables_per_second
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
