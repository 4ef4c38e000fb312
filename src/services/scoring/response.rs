use serde::Deserialize;
use serde_json::Value;

use crate::services::errors::GradingError;

/// Fields the model is asked to return.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AiScorePayload {
    pub(crate) score: f64,
    #[serde(default)]
    pub(crate) confidence: Option<f64>,
    #[serde(default)]
    pub(crate) feedback: String,
    #[serde(default)]
    pub(crate) strengths: Vec<String>,
    #[serde(default)]
    pub(crate) weaknesses: Vec<String>,
    #[serde(default)]
    pub(crate) suggestions: Vec<String>,
    #[serde(default, alias = "grading_details")]
    pub(crate) grading_details: Vec<Value>,
}

impl AiScorePayload {
    /// Confidence on the 0..1 scale. Values in (1, 100] are read as percentages.
    pub(crate) fn normalized_confidence(&self) -> f64 {
        match self.confidence {
            Some(value) if value > 1.0 && value <= 100.0 => value / 100.0,
            Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

pub(crate) fn parse_score_response(content: &str) -> Result<AiScorePayload, GradingError> {
    let block = first_json_object(content)
        .ok_or_else(|| GradingError::ResponseFormat("no JSON object found in response".into()))?;
    let payload: AiScorePayload = serde_json::from_str(block)
        .map_err(|err| GradingError::ResponseFormat(format!("invalid score JSON: {err}")))?;
    if !payload.score.is_finite() {
        return Err(GradingError::ResponseFormat("score is not a finite number".into()));
    }
    Ok(payload)
}

/// First balanced `{...}` block, ignoring braces inside JSON strings.
pub(crate) fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_surrounded_by_prose() {
        let text = "Here is the grade:\n```json\n{\"score\": 7, \"feedback\": \"ok\"}\n```\nThanks {not json}";
        assert_eq!(first_json_object(text), Some("{\"score\": 7, \"feedback\": \"ok\"}"));
    }

    #[test]
    fn braces_inside_strings_do_not_count() {
        let text = r#"{"feedback": "use \"{}\" carefully }", "score": 1} trailing"#;
        assert_eq!(first_json_object(text), Some(r#"{"feedback": "use \"{}\" carefully }", "score": 1}"#));
    }

    #[test]
    fn unbalanced_block_is_rejected() {
        assert_eq!(first_json_object("{\"score\": 3"), None);
        assert!(matches!(parse_score_response("no json here"), Err(GradingError::ResponseFormat(_))));
    }

    #[test]
    fn parses_payload_with_defaults() {
        let payload = parse_score_response(
            r#"{"score": 8.5, "confidence": 0.9, "strengths": ["clear"], "gradingDetails": [{"point": "a"}]}"#,
        )
        .expect("payload");
        assert_eq!(payload.score, 8.5);
        assert_eq!(payload.strengths, vec!["clear".to_string()]);
        assert!(payload.weaknesses.is_empty());
        assert_eq!(payload.grading_details.len(), 1);
    }

    #[test]
    fn missing_score_is_a_format_error() {
        let err = parse_score_response(r#"{"confidence": 0.9}"#).unwrap_err();
        assert!(matches!(err, GradingError::ResponseFormat(_)));
    }

    #[test]
    fn percentage_confidence_is_scaled() {
        let payload = parse_score_response(r#"{"score": 1, "confidence": 85}"#).unwrap();
        assert!((payload.normalized_confidence() - 0.85).abs() < 1e-9);
        let payload = parse_score_response(r#"{"score": 1}"#).unwrap();
        assert_eq!(payload.normalized_confidence(), 0.0);
    }
}
