use crate::llm::error::GenerationError;
use crate::llm::Provider;
use crate::prompt::StageKind;
use crate::schema::Schema;
use serde_json::Value;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

/// Parses model text as JSON and checks it against `schema`.
pub fn parse_structured(
    text: &str,
    schema: &Schema,
    provider: Provider,
    stage: StageKind,
) -> Result<Value, GenerationError> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let value = serde_json::from_str::<Value>(&json_str).map_err(|e| {
        GenerationError::schema_violation(
            provider,
            stage,
            format!("output is not valid JSON: {e}"),
            Some(text.to_string()),
        )
    })?;
    validate_structured(value, schema, provider, stage)
}

pub fn validate_structured(
    value: Value,
    schema: &Schema,
    provider: Provider,
    stage: StageKind,
) -> Result<Value, GenerationError> {
    match schema.validate(&value) {
        Ok(()) => Ok(value),
        Err(violation) => Err(GenerationError::schema_violation(
            provider,
            stage,
            violation.to_string(),
            Some(value.to_string()),
        )),
    }
}

/// Trims free-text output and drops a surrounding code fence or quote pair.
pub fn clean_text(text: &str) -> String {
    let mut s = text.trim();
    if s.starts_with("```") {
        s = s.splitn(2, '\n').nth(1).unwrap_or("");
        s = s.trim_end().trim_end_matches("```").trim();
    }
    for (open, close) in [('"', '"'), ('「', '」'), ('“', '”')] {
        if s.chars().count() >= 2 && s.starts_with(open) && s.ends_with(close) {
            s = &s[open.len_utf8()..s.len() - close.len_utf8()];
            break;
        }
    }
    s.trim().to_string()
}
