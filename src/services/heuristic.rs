use std::collections::HashSet;

use serde_json::{json, Map, Value};

use crate::schemas::checking::CheckingCriteria;
use crate::services::response_validator::Assessment;

const CONTENT_THRESHOLD_CHARS: usize = 20;
const VOLUME_THRESHOLD_CHARS: usize = 100;
const CONTENT_POINTS: f64 = 30.0;
const VOLUME_POINTS: f64 = 20.0;
const OVERLAP_WEIGHT: f64 = 30.0;
const PARTICIPATION_POINTS: f64 = 20.0;
const HEURISTIC_CONFIDENCE: f64 = 0.3;

pub const UNRECOGNIZED_TEXT_MARKER: &str = "❌ Text was not recognized or the work is empty";

/// Dependency-free scorer used when no AI service is configured and as the
/// landing point after exhausted AI retries.
///
/// score = 30 (more than 20 chars) + 20 (more than 100 chars)
///       + 30 * |task words ∩ text words| / max(1, |task words|)
///       + 20 participation, clamped to [0, 100].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn score(
        &self,
        recognized_text: &str,
        task_description: &str,
        criteria: &CheckingCriteria,
    ) -> Assessment {
        let text_length = recognized_text.chars().count();
        let task_words = words(task_description);
        let text_words = words(recognized_text);
        let common_words = task_words.intersection(&text_words).count();
        let overlap_ratio = common_words as f64 / task_words.len().max(1) as f64;

        let mut score = 0.0;
        let mut feedback = Vec::new();
        let mut suggestions = Vec::new();

        if text_length > CONTENT_THRESHOLD_CHARS {
            score += CONTENT_POINTS;
            feedback.push("✅ The work contains text".to_string());
        } else {
            feedback.push(UNRECOGNIZED_TEXT_MARKER.to_string());
            suggestions.push(
                "Make sure the photo is sharp and the handwriting is clearly legible".to_string(),
            );
        }

        if text_length > VOLUME_THRESHOLD_CHARS {
            score += VOLUME_POINTS;
            feedback.push("✅ Sufficient volume of work".to_string());
        } else if text_length > CONTENT_THRESHOLD_CHARS {
            feedback.push("⚠️ The solution is rather short".to_string());
            suggestions.push("Write out the solution steps in more detail".to_string());
        }

        score += overlap_ratio * OVERLAP_WEIGHT;
        if common_words > 0 {
            feedback.push(format!("✅ The work relates to the task ({common_words} shared words)"));
        } else if text_length > CONTENT_THRESHOLD_CHARS {
            feedback.push("⚠️ No words from the task statement were found in the work".to_string());
            suggestions.push("Refer to the task statement explicitly in the answer".to_string());
        }

        score += PARTICIPATION_POINTS;

        if let Some(min_length) = criteria.min_length() {
            if text_length < min_length {
                suggestions.push(format!("Expand the answer to at least {min_length} characters"));
            }
        }

        let lowered = recognized_text.to_lowercase();
        let missing_keywords: Vec<String> = criteria
            .keywords()
            .into_iter()
            .filter(|keyword| !lowered.contains(keyword.as_str()))
            .collect();
        if !missing_keywords.is_empty() {
            suggestions.push(format!("Cover the key terms: {}", missing_keywords.join(", ")));
        }

        let score = round_tenths(score.clamp(0.0, 100.0));

        let mut detailed_analysis = Map::new();
        detailed_analysis.insert("text_recognized".to_string(), json!(text_length > 0));
        detailed_analysis.insert("text_length".to_string(), json!(text_length));
        detailed_analysis.insert("common_words".to_string(), json!(common_words));
        detailed_analysis
            .insert("overlap_ratio".to_string(), json!((overlap_ratio * 100.0).round() / 100.0));
        if !missing_keywords.is_empty() {
            detailed_analysis.insert("missing_keywords".to_string(), Value::from(missing_keywords));
        }

        Assessment {
            score,
            feedback: feedback.join("\n"),
            detailed_analysis,
            confidence: HEURISTIC_CONFIDENCE,
            suggestions,
        }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(ToString::to_string).collect()
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
