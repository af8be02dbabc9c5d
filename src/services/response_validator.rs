//! Trust boundary between free-form AI completions and the checking pipeline.
//!
//! Nothing downstream reads the raw completion; it only sees an
//! [`Assessment`] produced by [`validate`].

use serde_json::{Map, Value};

pub const DEFAULT_SCORE: f64 = 50.0;
pub const DEFAULT_FEEDBACK: &str = "Could not fully analyze the work.";
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: f64,
    pub feedback: String,
    pub detailed_analysis: Map<String, Value>,
    pub confidence: f64,
    pub suggestions: Vec<String>,
}

/// Extracts the JSON object embedded in a completion. Models occasionally wrap
/// the object in prose or code fences, so everything outside the outermost
/// braces is ignored.
pub fn extract_json_object(content: &str) -> Option<Map<String, Value>> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    match serde_json::from_str::<Value>(&content[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

pub fn validate(raw: &Map<String, Value>) -> Assessment {
    let score = raw.get("score").and_then(number).unwrap_or(DEFAULT_SCORE).clamp(0.0, 100.0);

    let feedback = raw
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_FEEDBACK)
        .to_string();

    let detailed_analysis = match raw.get("detailed_analysis") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            let mut map = Map::new();
            map.insert("summary".to_string(), Value::String(text.trim().to_string()));
            map
        }
        _ => Map::new(),
    };

    let confidence = raw
        .get("confidence")
        .and_then(number)
        .map(|value| if value > 1.0 { value / 100.0 } else { value })
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);

    let suggestions = match raw.get("suggestions") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect(),
        Some(Value::String(item)) if !item.trim().is_empty() => vec![item.trim().to_string()],
        _ => Vec::new(),
    };

    Assessment { score, feedback, detailed_analysis, confidence, suggestions }
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn missing_required_fields_get_defaults() {
        let validated = validate(&Map::new());

        assert_eq!(validated.score, 50.0);
        assert_eq!(validated.feedback, DEFAULT_FEEDBACK);
        assert!(validated.detailed_analysis.is_empty());
        assert_eq!(validated.confidence, 0.8);
        assert!(validated.suggestions.is_empty());
    }

    #[test]
    fn score_is_clamped_and_accepts_numeric_strings() {
        assert_eq!(validate(&object(json!({"score": 140}))).score, 100.0);
        assert_eq!(validate(&object(json!({"score": -3.5}))).score, 0.0);
        assert_eq!(validate(&object(json!({"score": "72"}))).score, 72.0);
        assert_eq!(validate(&object(json!({"score": "85%"}))).score, 85.0);
        assert_eq!(validate(&object(json!({"score": "excellent"}))).score, 50.0);
        assert_eq!(validate(&object(json!({"score": null}))).score, 50.0);
    }

    #[test]
    fn confidence_is_normalized_into_unit_range() {
        assert_eq!(validate(&object(json!({"confidence": 0.95}))).confidence, 0.95);
        assert_eq!(validate(&object(json!({"confidence": 90}))).confidence, 0.9);
        assert_eq!(validate(&object(json!({"confidence": 400}))).confidence, 1.0);
        assert_eq!(validate(&object(json!({"confidence": -1}))).confidence, 0.0);
    }

    #[test]
    fn wrong_shapes_fall_back_to_safe_values() {
        let validated = validate(&object(json!({
            "score": 88,
            "feedback": {"text": "nested"},
            "detailed_analysis": "Roots found correctly",
            "suggestions": ["Check the sign", 3, "  "]
        })));

        assert_eq!(validated.score, 88.0);
        assert_eq!(validated.feedback, DEFAULT_FEEDBACK);
        assert_eq!(validated.detailed_analysis["summary"], "Roots found correctly");
        assert_eq!(validated.suggestions, vec!["Check the sign".to_string()]);
    }

    #[test]
    fn extract_json_object_strips_surrounding_prose() {
        let content = "Here is the review:\n```json\n{\"score\": 90, \"feedback\": \"ok\"}\n```";
        let map = extract_json_object(content).expect("object");
        assert_eq!(map["score"], 90);

        assert!(extract_json_object("no json at all").is_none());
        assert!(extract_json_object("} reversed {").is_none());
        assert!(extract_json_object("{\"score\": 90,").is_none());
        assert!(extract_json_object("[{\"score\": 1}]").is_some());
    }
}
