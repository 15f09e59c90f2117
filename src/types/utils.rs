//! Shared utility functions for lenient deserialization, string shaping and
//! identifiers.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

// =============================================================================
// Lenient Deserialization
// =============================================================================

/// Deserialize an optional number that may arrive as a JSON number, a numeric
/// string (`"997"`, `"1.500,00"` is rejected) or an empty string.
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Num(f64),
        Text(String),
    }

    match Option::<NumOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrText::Num(n)) => Ok(Some(n)),
        Some(NumOrText::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("not a number: {}", trimmed)))
        }
    }
}

/// Render any JSON value as display text; arrays are joined with `; `.
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, value_to_text(v)))
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

/// Deserialize free text that a model may have emitted as a string, list or number.
pub fn de_loose_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

/// Deserialize a list of strings that a model may have emitted as a single
/// string, a list of strings, or a list of objects.
pub fn de_loose_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect(),
        other => {
            let text = value_to_text(&other);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    })
}

/// Deserialize an optional string, treating blank strings as absent.
pub fn de_non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|s| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }))
}

// =============================================================================
// String Utilities
// =============================================================================

/// Capitalize the first character of a string.
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

/// Turn a snake_case key into a title (`comportamento_compra` -> `Comportamento Compra`).
pub fn title_case_key(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(capitalize_first)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Format a duration as `{minutes}m {seconds}s`.
pub fn format_minutes_seconds(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}m {}s", total / 60, total % 60)
}

// =============================================================================
// Identifiers
// =============================================================================

/// Build an id of the form `{prefix}_{unix_seconds}_{8 hex chars}`.
pub fn prefixed_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        chrono::Utc::now().timestamp(),
        &suffix[..8]
    )
}

/// Unwrap a result, logging and discarding the error at warn level.
pub fn log_filter_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loose_list_accepts_shapes() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "de_loose_list")]
            items: Vec<String>,
            #[serde(default, deserialize_with = "de_loose_text")]
            text: String,
        }
        let p: Probe = serde_json::from_value(json!({"items": "single", "text": ["a", "b"]})).unwrap();
        assert_eq!(p.items, vec!["single"]);
        assert_eq!(p.text, "a; b");
        let p: Probe = serde_json::from_value(json!({"items": [{"dor": "x"}, "y", ""]})).unwrap();
        assert_eq!(p.items, vec!["dor: x", "y"]);
        let p: Probe = serde_json::from_value(json!({"items": null, "text": 7})).unwrap();
        assert!(p.items.is_empty());
        assert_eq!(p.text, "7");
    }

    #[test]
    fn test_title_case_key() {
        assert_eq!(title_case_key("comportamento_compra"), "Comportamento Compra");
        assert_eq!(title_case_key("idade"), "Idade");
    }

    #[test]
    fn test_truncate_chars_respects_utf8() {
        assert_eq!(truncate_chars("análise", 3), "aná");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_format_minutes_seconds() {
        assert_eq!(format_minutes_seconds(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_minutes_seconds(Duration::from_millis(900)), "0m 0s");
    }

    #[test]
    fn test_prefixed_id_shape() {
        let id = prefixed_id("analysis");
        let re = regex::Regex::new(r"^analysis_\d+_[0-9a-f]{8}$").unwrap();
        assert!(re.is_match(&id), "unexpected id {}", id);
    }

    #[test]
    fn test_lenient_number() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "de_lenient_f64")]
            price: Option<f64>,
        }
        let p: Probe = serde_json::from_value(json!({"price": "997"})).unwrap();
        assert_eq!(p.price, Some(997.0));
        let p: Probe = serde_json::from_value(json!({"price": ""})).unwrap();
        assert_eq!(p.price, None);
        let p: Probe = serde_json::from_value(json!({"price": 12.5})).unwrap();
        assert_eq!(p.price, Some(12.5));
        let p: Probe = serde_json::from_value(json!({})).unwrap();
        assert_eq!(p.price, None);
        assert!(serde_json::from_value::<Probe>(json!({"price": "abc"})).is_err());
    }
}
