//! Audit capture for mutating actions.
//!
//! Request bodies are sanitized before persistence: any key whose lowercased
//! name contains `password`, or both `api` and `key`, is replaced with a fixed
//! marker while the surrounding structure is preserved. Updates that carry a
//! previous value persist only the shallow diff of changed top-level keys.
//! Key identifiers are reduced to a short display fingerprint.

mod recorder;

pub use recorder::{AuditEvent, AuditRecorder};

use serde_json::{Map, Value};

/// Marker written in place of sensitive values.
pub const REDACTION_MARKER: &str = "***";

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.contains("password") || (key.contains("api") && key.contains("key"))
}

/// Recursively replace sensitive values, preserving nested structure.
#[must_use]
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut clean = Map::with_capacity(fields.len());
            for (key, field) in fields {
                if is_sensitive_key(key) {
                    clean.insert(key.clone(), Value::String(REDACTION_MARKER.to_string()));
                } else {
                    clean.insert(key.clone(), sanitize(field));
                }
            }
            Value::Object(clean)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// Shallow diff of changed top-level keys between two JSON objects.
///
/// Non-object inputs fall back to the new value unchanged (the parse-failure
/// path upstream produces exactly that).
#[must_use]
pub fn shallow_diff(previous: &Value, new: &Value) -> Value {
    let (Some(previous), Some(new)) = (previous.as_object(), new.as_object()) else {
        return new.clone();
    };
    let changed: Map<String, Value> = new
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(changed)
}

/// Truncated display form of a key identifier: first three and last three
/// characters. Short identifiers are fully masked rather than leaked.
#[must_use]
pub fn fingerprint(identifier: &str) -> String {
    let chars: Vec<char> = identifier.chars().collect();
    if chars.len() < 8 {
        return REDACTION_MARKER.to_string();
    }
    let head: String = chars.iter().take(3).collect();
    let tail: String = chars.iter().rev().take(3).rev().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitizes_nested_sensitive_keys() {
        let body = json!({
            "password": "x",
            "nested": { "apiKey": "y", "other": 1 },
        });
        let clean = sanitize(&body);
        assert_eq!(
            clean,
            json!({
                "password": "***",
                "nested": { "apiKey": "***", "other": 1 },
            })
        );
    }

    #[test]
    fn sanitizer_matches_case_insensitively_and_in_arrays() {
        let body = json!({
            "items": [
                { "Password_confirm": "secret", "name": "a" },
                { "API_KEY": "k", "count": 2 },
            ],
            "ApiKeyId": "visible-id",
        });
        let clean = sanitize(&body);
        assert_eq!(clean["items"][0]["Password_confirm"], "***");
        assert_eq!(clean["items"][0]["name"], "a");
        assert_eq!(clean["items"][1]["API_KEY"], "***");
        // "ApiKeyId" contains both "api" and "key"; redacted too.
        assert_eq!(clean["ApiKeyId"], "***");
    }

    #[test]
    fn sanitizer_leaves_scalars_untouched() {
        assert_eq!(sanitize(&json!(42)), json!(42));
        assert_eq!(sanitize(&json!("plain")), json!("plain"));
        assert_eq!(sanitize(&Value::Null), Value::Null);
    }

    #[test]
    fn diff_keeps_only_changed_top_level_keys() {
        let previous = json!({ "a": 1, "b": 2 });
        let new = json!({ "a": 1, "b": 3 });
        assert_eq!(shallow_diff(&previous, &new), json!({ "b": 3 }));
    }

    #[test]
    fn diff_includes_added_keys_and_is_shallow() {
        let previous = json!({ "a": { "x": 1 }, "b": 2 });
        let new = json!({ "a": { "x": 2 }, "b": 2, "c": 4 });
        assert_eq!(
            shallow_diff(&previous, &new),
            json!({ "a": { "x": 2 }, "c": 4 })
        );
    }

    #[test]
    fn diff_falls_back_to_new_value_for_non_objects() {
        let previous = json!("raw previous");
        let new = json!("raw new");
        assert_eq!(shallow_diff(&previous, &new), json!("raw new"));
    }

    #[test]
    fn fingerprint_is_first_and_last_three() {
        assert_eq!(fingerprint("abcdefghijkl"), "abc...jkl");
        assert_eq!(fingerprint("short"), "***");
    }
}
