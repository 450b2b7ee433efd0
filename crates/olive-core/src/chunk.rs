//! Stream chunk normalization.
//!
//! AI providers emit streaming payloads in many shapes: bare strings,
//! `{"delta": ...}`, `{"token": ...}`, OpenAI-style
//! `{"choices": [{"delta": {"content": ...}}]}`, and so on. [`normalize`]
//! maps any of them to the plain text delta they carry, or `""` when the
//! shape is not recognized. It never fails, so downstream buffering only
//! ever receives text.
//!
//! # Field priority
//!
//! 1. A plain string is returned unchanged.
//! 2. `delta`, `token`, `text`, `content`: the first non-empty string wins.
//!    A field holding an object is normalized recursively.
//! 3. `data`, only when it is a string.
//! 4. Each element of `choices`, inspected for `delta`, `text`, `content`.
//! 5. Otherwise `""`.

use serde_json::Value;

const PRIMARY_FIELDS: &[&str] = &["delta", "token", "text", "content"];
const CHOICE_FIELDS: &[&str] = &["delta", "text", "content"];

/// Extract the text delta carried by one raw stream chunk.
///
/// # Example
///
/// ```rust
/// use olive_core::chunk::normalize;
/// use serde_json::json;
///
/// assert_eq!(normalize(&json!("hi")), "hi");
/// assert_eq!(normalize(&json!({"choices": [{"delta": {"content": "yo"}}]})), "yo");
/// assert_eq!(normalize(&json!({"unknown": 1})), "");
/// ```
pub fn normalize(chunk: &Value) -> String {
    match chunk {
        Value::String(s) => s.clone(),
        Value::Object(_) => from_fields(chunk, PRIMARY_FIELDS)
            .or_else(|| chunk.get("data").and_then(Value::as_str).map(str::to_string))
            .or_else(|| from_choices(chunk))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn from_fields(obj: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match obj.get(*field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        nested @ Value::Object(_) => Some(normalize(nested)).filter(|s| !s.is_empty()),
        _ => None,
    })
}

fn from_choices(obj: &Value) -> Option<String> {
    obj.get("choices")?
        .as_array()?
        .iter()
        .find_map(|choice| from_fields(choice, CHOICE_FIELDS))
}

/// Turn a complete, non-streaming provider reply into display text.
///
/// A string is used as is, then a string `text` field, then the JSON
/// serialization of the whole value. `null` yields `""`.
pub fn fallback_text(reply: &Value) -> String {
    match reply {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => match other.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => other.to_string(),
        },
    }
}
