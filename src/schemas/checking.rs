use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Checked,
    Failed,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checked => "checked",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Basic,
    Standard,
    Advanced,
    Premium,
}

impl QualityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Advanced => "advanced",
            Self::Premium => "premium",
        }
    }

    pub fn uses_ai(self) -> bool {
        !matches!(self, Self::Basic)
    }

    pub fn sends_image(self) -> bool {
        matches!(self, Self::Advanced | Self::Premium)
    }

    pub fn checks_plagiarism(self) -> bool {
        matches!(self, Self::Premium)
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "advanced" => Ok(Self::Advanced),
            "premium" => Ok(Self::Premium),
            other => Err(format!("unknown quality level: {other}")),
        }
    }
}

/// Read-only view of the task being checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub description: String,
    pub task_type: String,
    #[serde(default)]
    pub checking_criteria: CheckingCriteria,
}

/// Free-form criteria map attached to a task. Only `keywords` and
/// `min_length` are interpreted locally; everything is forwarded to the AI
/// prompt as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckingCriteria(pub Map<String, Value>);

impl CheckingCriteria {
    pub fn keywords(&self) -> Vec<String> {
        self.0
            .get("keywords")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|item| item.trim().to_lowercase())
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn min_length(&self) -> Option<usize> {
        self.0.get("min_length").and_then(Value::as_u64).map(|value| value as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }
}

impl From<Value> for CheckingCriteria {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckingResult {
    pub recognized_text: String,
    pub score: f64,
    pub feedback: String,
    pub detailed_analysis: Map<String, Value>,
    pub confidence_score: f64,
    pub processing_time: f64,
    pub status: CheckStatus,
    pub quality_level: QualityLevel,
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plagiarism_score: Option<f64>,
}

impl CheckingResult {
    pub(crate) const FAILED_FEEDBACK: &'static str =
        "The work could not be checked because of an internal error. Please try again later.";
    pub(crate) const RETRY_SUGGESTION: &'static str =
        "Retake the photo in good lighting so the whole page is sharp and readable, then resubmit.";

    pub(crate) fn failed(quality_level: QualityLevel, processing_time: f64) -> Self {
        Self {
            recognized_text: String::new(),
            score: 0.0,
            feedback: Self::FAILED_FEEDBACK.to_string(),
            detailed_analysis: Map::new(),
            confidence_score: 0.0,
            processing_time: processing_time.max(0.0),
            status: CheckStatus::Failed,
            quality_level,
            suggestions: vec![Self::RETRY_SUGGESTION.to_string()],
            plagiarism_score: None,
        }
    }
}
