//! Heuristic analysis used when no vendor answered.
//!
//! Scores come from the two prosody numbers the client already measured:
//!
//! | Score          | Formula                                   |
//! |----------------|-------------------------------------------|
//! | prosody        | `clamp((pitch_mean - 100) / 20, 5, 10)`   |
//! | fluency        | `clamp(syllables_per_second * 2, 5, 10)`  |
//! | overall        | mean of the two above                     |
//! | pronunciation, emotion, confidence | fixed 7.0             |
//!
//! Every value is rounded to one decimal.  The floor of 5 keeps the result
//! encouraging when the measurements are missing or nonsensical.

use std::collections::BTreeMap;

use crate::llm::{AnalysisResult, DetailedFeedback, Feedback, ProsodyFeatures, Scores, MAX_SCORE};

use super::DEGRADED_PROVIDER;

const MIN_DEGRADED_SCORE: f64 = 5.0;
const NEUTRAL_SCORE: f64 = 7.0;

const BUSY_MESSAGE: &str =
    "Hệ thống đang bận, vui lòng thử lại sau. Chúng tôi đã ghi nhận bài tập của bạn.";
const NO_DETAIL_MESSAGE: &str = "Không thể phân tích chi tiết lúc này";
const RETRY_SUGGESTION: &str = "Vui lòng thử lại sau";

/// Build the fallback result.  Never fails; every score is finite and in
/// `[5, 10]`.
pub fn degraded_response(prosody: &ProsodyFeatures) -> AnalysisResult {
    let pitch_score = bounded((prosody.pitch.mean - 100.0) / 20.0);
    let rate_score = bounded(prosody.speaking_rate.syllables_per_second * 2.0);

    let scores = Scores {
        overall: round1((pitch_score + rate_score) / 2.0),
        pronunciation: NEUTRAL_SCORE,
        prosody: round1(pitch_score),
        emotion: NEUTRAL_SCORE,
        confidence: NEUTRAL_SCORE,
        fluency: round1(rate_score),
    };

    let mut aspects = BTreeMap::new();
    aspects.insert("pronunciation".to_string(), NO_DETAIL_MESSAGE.to_string());

    AnalysisResult {
        scores,
        feedback: Feedback {
            conversational: BUSY_MESSAGE.to_string(),
            detailed: DetailedFeedback {
                aspects,
                suggestions: vec![RETRY_SUGGESTION.to_string()],
            },
        },
        provider_used: DEGRADED_PROVIDER.to_string(),
        was_degraded: true,
        model: None,
    }
}

/// Clamp into `[5, 10]`; NaN and infinities land on the floor.
fn bounded(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(MIN_DEGRADED_SCORE, MAX_SCORE)
    } else {
        MIN_DEGRADED_SCORE
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{PitchStats, SpeakingRate};

    fn features(pitch: f64, rate: f64) -> ProsodyFeatures {
        ProsodyFeatures {
            pitch: PitchStats {
                mean: pitch,
                std: 0.0,
            },
            speaking_rate: SpeakingRate {
                syllables_per_second: rate,
                total_syllables: 0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn zero_pitch_clamps_to_minimum() {
        let r = degraded_response(&features(0.0, 0.0));
        assert_eq!(r.scores.prosody, 5.0);
        assert_eq!(r.scores.fluency, 5.0);
        assert_eq!(r.scores.overall, 5.0);
        assert!(r.scores.in_range());
    }

    #[test]
    fn typical_speech() {
        // (220 - 100) / 20 = 6.0, 3.5 * 2 = 7.0
        let r = degraded_response(&features(220.0, 3.5));
        assert_eq!(r.scores.prosody, 6.0);
        assert_eq!(r.scores.fluency, 7.0);
        assert_eq!(r.scores.overall, 6.5);
        assert_eq!(r.scores.pronunciation, 7.0);
        assert_eq!(r.scores.emotion, 7.0);
        assert_eq!(r.scores.confidence, 7.0);
    }

    #[test]
    fn large_inputs_clamp_to_maximum() {
        let r = degraded_response(&features(1_000.0, 12.0));
        assert_eq!(r.scores.prosody, 10.0);
        assert_eq!(r.scores.fluency, 10.0);
        assert_eq!(r.scores.overall, 10.0);
    }

    #[test]
    fn scores_round_to_one_decimal() {
        // (230 - 100) / 20 = 6.5, 2.87 * 2 = 5.74, mean 6.12
        let r = degraded_response(&features(230.0, 2.87));
        assert_eq!(r.scores.prosody, 6.5);
        assert_eq!(r.scores.fluency, 5.7);
        assert_eq!(r.scores.overall, 6.1);
    }

    #[test]
    fn non_finite_inputs_never_leak() {
        for (pitch, rate) in [
            (f64::NAN, f64::NAN),
            (f64::INFINITY, f64::NEG_INFINITY),
            (-500.0, -3.0),
        ] {
            let r = degraded_response(&features(pitch, rate));
            assert!(r.scores.in_range(), "{pitch} {rate} -> {:?}", r.scores);
            assert_eq!(r.scores.prosody, 5.0);
            assert_eq!(r.scores.fluency, 5.0);
        }
    }

    #[test]
    fn marks_result_as_degraded_with_vietnamese_feedback() {
        let r = degraded_response(&ProsodyFeatures::default());
        assert!(r.was_degraded);
        assert_eq!(r.provider_used, "degraded");
        assert!(r.model.is_none());
        assert!(r.feedback.conversational.starts_with("Hệ thống đang bận"));
        assert_eq!(
            r.feedback.detailed.aspects.get("pronunciation").map(String::as_str),
            Some("Không thể phân tích chi tiết lúc này")
        );
        assert_eq!(r.feedback.detailed.suggestions, ["Vui lòng thử lại sau"]);
    }

    #[test]
    fn serializes_with_expected_fields() {
        let json = serde_json::to_value(degraded_response(&ProsodyFeatures::default())).unwrap();
        assert_eq!(json["provider_used"], "degraded");
        assert_eq!(json["was_degraded"], true);
        assert!(json["scores"]["overall"].is_number());
        assert!(json["feedback"]["detailed"]["suggestions"].is_array());
        assert!(json.get("model").is_none());
    }
}
