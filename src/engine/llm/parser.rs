//! Parsing of model output into a structured decision.
//!
//! The model may return a bare JSON object, a fenced code block, or JSON
//! with trailing prose. The parser extracts the first balanced JSON object
//! and validates the three required fields; model content is never
//! executed or interpreted beyond that.

use serde_json::Value;

/// A structured model decision.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmDecision {
    /// Whether the model wants the rule to fire.
    pub should_trigger: bool,
    /// Model confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Model reasoning.
    pub reason: String,
}

/// Parse the model response.
///
/// Returns a detail string on failure; callers map it to a
/// `parse_error:<detail>` non-firing result and skip the cache.
pub fn parse_response(response: &str) -> Result<LlmDecision, String> {
    let object = extract_json_object(response).ok_or("no JSON object in response")?;
    let value: Value =
        serde_json::from_str(object).map_err(|e| format!("invalid JSON: {e}"))?;

    let should_trigger = match value.get("should_trigger") {
        Some(Value::Bool(b)) => *b,
        // Some models quote booleans.
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        Some(other) => return Err(format!("should_trigger has type {}", type_name(other))),
        None => return Err("missing should_trigger".to_string()),
    };

    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().ok_or("confidence is not finite")?,
        Some(other) => return Err(format!("confidence has type {}", type_name(other))),
        None => return Err("missing confidence".to_string()),
    };

    let reason = match value.get("reason") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(format!("reason has type {}", type_name(other))),
        None => return Err("missing reason".to_string()),
    };

    Ok(LlmDecision {
        should_trigger,
        confidence: confidence.clamp(0.0, 1.0),
        reason,
    })
}

/// Extract the first balanced `{...}` object, respecting strings and
/// escapes. Single forward scan.
fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
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

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_object() {
        let decision = parse_response(
            r#"{"should_trigger": true, "confidence": 0.9, "reason": "streak detected"}"#,
        )
        .unwrap();
        assert!(decision.should_trigger);
        assert_eq!(decision.confidence, 0.9);
        assert_eq!(decision.reason, "streak detected");
    }

    #[test]
    fn test_parse_fenced_block_with_prose() {
        let response = "Here is my analysis:\n```json\n{\"should_trigger\": false, \"confidence\": 0.4, \"reason\": \"too few events\"}\n```\nLet me know if you need more.";
        let decision = parse_response(response).unwrap();
        assert!(!decision.should_trigger);
        assert_eq!(decision.confidence, 0.4);
    }

    #[test]
    fn test_parse_nested_object_and_braces_in_strings() {
        let response = r#"{"should_trigger": true, "confidence": 1.0, "reason": "data {x} looked like {\"y\": 1}"}"#;
        let decision = parse_response(response).unwrap();
        assert!(decision.reason.contains("{x}"));
    }

    #[test]
    fn test_parse_stringy_boolean() {
        let decision = parse_response(
            r#"{"should_trigger": "true", "confidence": 0.8, "reason": "ok"}"#,
        )
        .unwrap();
        assert!(decision.should_trigger);
    }

    #[test]
    fn test_confidence_clamped() {
        let decision = parse_response(
            r#"{"should_trigger": true, "confidence": 1.8, "reason": "overconfident"}"#,
        )
        .unwrap();
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_missing_and_mistyped_fields() {
        assert!(parse_response("no json here").is_err());
        assert!(parse_response(r#"{"confidence": 0.5, "reason": "r"}"#).is_err());
        assert!(parse_response(r#"{"should_trigger": true, "reason": "r"}"#).is_err());
        assert!(parse_response(r#"{"should_trigger": true, "confidence": 0.5}"#).is_err());
        assert!(
            parse_response(r#"{"should_trigger": 1, "confidence": 0.5, "reason": "r"}"#).is_err()
        );
        assert!(parse_response(r#"{"should_trigger": true, "confidence": "hi", "reason": "r"}"#)
            .is_err());
    }

    #[test]
    fn test_unbalanced_object_rejected() {
        assert!(parse_response(r#"{"should_trigger": true, "#).is_err());
    }
}
