/*!
 * Settings object
 *
 * A processor family's settings are an abstract structured tree: PUT
 * consumes a text blob in one of two equivalent forms (a JSON object,
 * or a flat `key=value&key=value` query string), GET produces a
 * `SettingsTree`. Nothing here mandates a serialization library for the
 * wire form; internally this crate uses `serde_json` for the structured
 * branch, the same crate already in use for config/API types.
 */

pub mod audio;
pub mod video;

use crate::core::errors::{MpResult, Status};
use std::collections::BTreeMap;

/// One node of a settings tree: number, string, boolean, null, array,
/// or nested object. Numbers are carried as `f64` since the wire forms
/// (JSON, flat strings) don't distinguish integer/float; callers that
/// need an integer use `Value::as_i64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|n| u32::try_from(n).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A structured settings response, as produced by `Settings::get` and
/// the registry's GET envelope (`settings::wrap_envelope`).
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsTree(Value);

impl SettingsTree {
    pub fn new(value: Value) -> Self {
        SettingsTree(value)
    }

    pub fn empty_object() -> Self {
        SettingsTree(Value::Object(BTreeMap::new()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Looks up `key` if this tree is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match &self.0 {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Inserts or replaces `key` if this tree is an object; turns the
    /// tree into an (initially empty) object otherwise.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if !matches!(self.0, Value::Object(_)) {
            self.0 = Value::Object(BTreeMap::new());
        }
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.into(), value);
        }
    }
}

/// Implemented by every per-processor-family settings object.
pub trait Settings {
    /// Applies a text blob (flat or JSON, see `parse_flat_or_json`).
    /// Unrecognized keys are ignored; a recognized key with an invalid
    /// value fails the whole call without partial commit.
    fn put(&mut self, text: &str) -> MpResult<()>;

    /// Reads back the current settings as a structured tree.
    fn get(&self) -> SettingsTree;
}

/// Serializes a settings tree back to its JSON text form, used to
/// replay a snapshot through `put_settings` after a backend reset or a
/// `proc_name` swap (`registry::id_put`, `processor::ProcessorInstance`).
pub fn to_json_text(tree: &SettingsTree) -> String {
    serde_json::to_string(&value_to_serde(&tree.0)).unwrap_or_else(|_| "{}".to_string())
}

fn value_to_serde(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_serde).collect()),
        Value::Object(map) => {
            serde_json::Value::Object(map.iter().map(|(k, v)| (k.clone(), value_to_serde(v))).collect())
        }
    }
}

/// Wraps a processor's settings tree in the GET envelope: a `settings`
/// key holding the per-descriptor tree.
pub fn wrap_envelope(settings: SettingsTree) -> SettingsTree {
    let mut envelope = SettingsTree::empty_object();
    envelope.set("settings", settings.into_value());
    envelope
}

/// Dispatches on the first/last character of `text`: `{...}` is parsed
/// as a JSON object, anything else as a flat `key=value&key=value...`
/// string. Flat values are typed on the fly: `true`/`false` become
/// booleans, strings that parse as a number become numbers, everything
/// else stays a string.
pub fn parse_flat_or_json(text: &str) -> MpResult<SettingsTree> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        let json: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| Status::InvalidArgument(format!("invalid settings JSON: {e}")))?;
        Ok(SettingsTree(json_to_value(json)))
    } else {
        Ok(SettingsTree(parse_flat(trimmed)))
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

fn parse_flat(text: &str) -> Value {
    let mut map = BTreeMap::new();
    if text.is_empty() {
        return Value::Object(map);
    }
    for pair in text.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((key, raw)) => {
                map.insert(key.to_string(), infer_flat_value(raw));
            }
            None => {
                map.insert(pair.to_string(), Value::Null);
            }
        }
    }
    Value::Object(map)
}

fn infer_flat_value(raw: &str) -> Value {
    if raw == "true" {
        Value::Bool(true)
    } else if raw == "false" {
        Value::Bool(false)
    } else if let Ok(n) = raw.parse::<f64>() {
        Value::Number(n)
    } else {
        Value::String(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_string_infers_number_and_leaves_strings_alone() {
        let tree = parse_flat_or_json("setting1=100&name=bypass").unwrap();
        assert_eq!(tree.get("setting1").unwrap().as_i64(), Some(100));
        assert_eq!(tree.get("name").unwrap().as_str(), Some("bypass"));
    }

    #[test]
    fn flat_string_infers_booleans() {
        let tree = parse_flat_or_json("flag_zerolatency=true").unwrap();
        assert_eq!(tree.get("flag_zerolatency").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn json_object_round_trips_through_serde_json() {
        let tree = parse_flat_or_json(r#"{"bit_rate_output": 128000, "conf_preset": "fast"}"#).unwrap();
        assert_eq!(tree.get("bit_rate_output").unwrap().as_i64(), Some(128000));
        assert_eq!(tree.get("conf_preset").unwrap().as_str(), Some("fast"));
    }

    #[test]
    fn dispatch_rule_is_based_on_first_and_last_character() {
        // Not a `{...}` span even though it contains braces mid-string.
        let tree = parse_flat_or_json("a=1&b={2}").unwrap();
        assert_eq!(tree.get("a").unwrap().as_i64(), Some(1));
    }

    #[test]
    fn envelope_wraps_under_settings_key() {
        let inner = SettingsTree::new(Value::Number(42.0));
        let envelope = wrap_envelope(inner);
        assert_eq!(envelope.get("settings").unwrap().as_i64(), Some(42));
    }
}
