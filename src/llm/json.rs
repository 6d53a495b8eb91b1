use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use thiserror::Error;

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
});

#[derive(Debug, Clone, Error)]
#[error("could not extract valid JSON from model output: {0}")]
pub struct ModelOutputParseError(pub String);

/// Pulls the first JSON object out of free-form model output.
///
/// Tried in order: the whole trimmed text, a fenced code block, then the
/// span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Result<Map<String, Value>, ModelOutputParseError> {
    let text = text.trim();

    if let Some(obj) = parse_object(text) {
        return Ok(obj);
    }

    if let Some(caps) = FENCED_JSON_RE.captures(text) {
        if let Some(obj) = parse_object(caps[1].trim()) {
            return Ok(obj);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Some(obj) = parse_object(&text[start..=end]) {
                return Ok(obj);
            }
        }
    }

    Err(ModelOutputParseError(preview(text)))
}

/// Extracts a JSON object and deserializes it into a stage output record.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T, ModelOutputParseError> {
    let obj = extract_json(text)?;
    serde_json::from_value(Value::Object(obj))
        .map_err(|e| ModelOutputParseError(format!("unexpected shape: {}", e)))
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn whole_text_is_tried_first() {
        let obj = extract_json("  {\"sql\": \"SELECT 1\"}\n").unwrap();
        assert_eq!(Value::Object(obj), json!({"sql": "SELECT 1"}));
    }

    #[test]
    fn fenced_block_is_extracted() {
        let obj = extract_json("Sure! ```json\n{\"rephrased_query\": \"x\"}\n```").unwrap();
        assert_eq!(Value::Object(obj), json!({"rephrased_query": "x"}));
    }

    #[test]
    fn bare_fence_without_language_tag() {
        let obj = extract_json("Here:\n```\n{\"a\": 1}\n```\nDone.").unwrap();
        assert_eq!(obj["a"], json!(1));
    }

    #[test]
    fn brace_span_is_the_last_resort() {
        let obj = extract_json("The answer is {\"a\": {\"b\": 2}} as requested").unwrap();
        assert_eq!(Value::Object(obj), json!({"a": {"b": 2}}));
    }

    #[test]
    fn text_without_braces_fails() {
        assert!(extract_json("I cannot help with that.").is_err());
        assert!(extract_json("").is_err());
    }

    #[test]
    fn broken_json_fails_every_tier() {
        assert!(extract_json("```json\n{\"a\": }\n```").is_err());
        assert!(extract_json("} backwards {").is_err());
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(extract_json("[1, 2, 3]").is_err());
        assert!(extract_json("\"just a string\"").is_err());
    }

    #[derive(Debug, Deserialize)]
    struct Shape {
        name: String,
    }

    #[test]
    fn extract_as_validates_shape() {
        let shape: Shape = extract_as("{\"name\": \"n\"}").unwrap();
        assert_eq!(shape.name, "n");

        let err = extract_as::<Shape>("{\"other\": 1}").unwrap_err();
        assert!(err.to_string().contains("unexpected shape"));
    }
}
