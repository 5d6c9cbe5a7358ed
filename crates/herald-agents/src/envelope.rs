//! Parsing for single-JSON-envelope agents (claude/gemini style).
//!
//! Terminal control sequences are stripped, then the whole trimmed output is
//! tried as JSON; on failure, lines are scanned from the bottom for the last
//! parseable object (agents that log banners above their envelope).

use serde_json::Value;

/// Strip ANSI escapes and decode to text.
pub fn strip_controls(raw: &str) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(raw.as_bytes())).into_owned()
}

/// Locate the envelope object in `raw`, if any.
pub fn parse(raw: &str) -> Option<Value> {
    let clean = strip_controls(raw);
    let trimmed = clean.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    for line in trimmed.lines().rev() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}

/// Accept a session id only when it is RFC-4122 shaped. Envelope agents echo
/// arbitrary text into error fields; a UUID check keeps garbage out of the
/// thread store.
pub fn session_id(envelope: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(id) = envelope.get(key).and_then(Value::as_str) {
            if uuid::Uuid::parse_str(id).is_ok() {
                return Some(id.to_string());
            }
        }
    }
    None
}
