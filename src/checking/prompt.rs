use crate::schemas::checking::TaskContext;

pub(crate) const SYSTEM_PROMPT: &str = r#"You are an experienced teacher grading a student's handwritten work.
You receive the task statement, the checking criteria and the text recognized from a photo of the work.
The recognized text may contain OCR errors; judge the intended solution, not the recognition noise.
When an image of the work is attached, treat it as the primary source and the text as a hint.

Grade on a 0-100 scale:
- correctness of the method and the result
- completeness of the solution steps
- clarity of presentation and notation

Respond with a single JSON object and nothing else:
{
  "score": <number 0-100>,
  "feedback": "short overall feedback for the student",
  "detailed_analysis": {
    "correct_points": ["what is done right"],
    "errors": ["mistakes found"],
    "recommendations": ["how to improve"],
    "presentation": "assessment of layout and notation",
    "completeness": "assessment of how complete the solution is"
  },
  "confidence": <number 0-1, how sure you are about the grade>,
  "suggestions": ["concrete next steps for the student"]
}
"#;

const NO_TEXT_MARKER: &str = "(no text recognized)";

pub(crate) fn user_prompt(task: &TaskContext, recognized_text: &str) -> String {
    let criteria = if task.checking_criteria.is_empty() {
        "none specified".to_string()
    } else {
        task.checking_criteria.to_pretty_json()
    };
    let text = if recognized_text.trim().is_empty() { NO_TEXT_MARKER } else { recognized_text };

    format!(
        "Task:\n{}\n\nTask type: {}\n\nChecking criteria:\n{}\n\nRecognized text of the student's work:\n{}\n\nGrade the work and answer strictly in the JSON format from the instructions.",
        task.description.trim(),
        task.task_type.trim(),
        criteria,
        text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::checking::CheckingCriteria;
    use serde_json::json;

    #[test]
    fn prompt_carries_task_and_text() {
        let task = TaskContext {
            description: "Solve x^2 - 5x + 6 = 0".to_string(),
            task_type: "algebra".to_string(),
            checking_criteria: CheckingCriteria::from(json!({"keywords": ["roots"]})),
        };
        let prompt = user_prompt(&task, "x1 = 2, x2 = 3");

        assert!(prompt.contains("Solve x^2 - 5x + 6 = 0"));
        assert!(prompt.contains("Task type: algebra"));
        assert!(prompt.contains("\"keywords\""));
        assert!(prompt.contains("x1 = 2, x2 = 3"));
    }

    #[test]
    fn empty_text_is_marked_explicitly() {
        let prompt = user_prompt(&TaskContext::default(), "  ");

        assert!(prompt.contains(NO_TEXT_MARKER));
        assert!(prompt.contains("none specified"));
    }
}
