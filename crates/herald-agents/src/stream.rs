//! Parsing for line-delimited JSON event streams (codex-style agents).
//!
//! Characters are buffered until the prefix parses as a complete JSON
//! object, which is then emitted and the buffer reset. Anything that never
//! completes (log noise, partial writes at a buffer cap) is dropped.

use serde_json::Value;

use crate::adapter::{ParsedOutput, Usage};

/// Scan `raw` for complete top-level JSON objects, in order.
pub fn scan_objects(raw: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let mut buf = String::new();

    for ch in raw.chars() {
        if buf.trim_start().is_empty() && ch != '{' {
            // Discard inter-object noise until an object opens.
            if ch == '\n' {
                buf.clear();
            }
            continue;
        }
        buf.push(ch);
        if ch == '}' {
            if let Ok(value) = serde_json::from_str::<Value>(buf.trim_start()) {
                objects.push(value);
                buf.clear();
            }
        }
    }
    objects
}

/// Interpret a scanned event stream as one agent turn.
///
/// - session id: the first `thread.started` / `session.started` event
/// - text: the `final`-channel message when a channel discriminator exists,
///   otherwise the last message item
/// - usage: the last event carrying a `usage` object
pub fn extract_turn(objects: &[Value]) -> ParsedOutput {
    let mut out = ParsedOutput {
        saw_json: !objects.is_empty(),
        ..Default::default()
    };

    let mut last_message: Option<String> = None;
    let mut final_message: Option<String> = None;

    for obj in objects {
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or("");

        if matches!(kind, "thread.started" | "session.started") && out.session_id.is_none() {
            out.session_id = obj
                .get("thread_id")
                .or_else(|| obj.get("session_id"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        if let Some(text) = message_text(obj) {
            match obj.get("channel").and_then(Value::as_str) {
                Some("final") => final_message = Some(text),
                Some(_) => {}
                None => last_message = Some(text),
            }
        }

        if let Some(usage) = obj.get("usage") {
            out.usage = Some(Usage {
                input_tokens: usage
                    .get("input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                output_tokens: usage
                    .get("output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            });
        }

        if let Some(cost) = obj.get("total_cost_usd").and_then(Value::as_f64) {
            out.cost_usd = Some(cost);
        }
    }

    out.text = final_message.or(last_message).unwrap_or_default();
    out
}

/// Pull message text out of the event shapes the stream agents emit:
/// a bare `message` string, or an `item.completed` wrapping a message item.
fn message_text(obj: &Value) -> Option<String> {
    if let Some(text) = obj.get("message").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let item = obj.get("item")?;
    let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
    if matches!(item_type, "agent_message" | "assistant_message" | "message") {
        return item
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    None
}

/// Build a synthetic event stream, used by adapter tests.
#[cfg(test)]
pub fn synthetic_stream(session_id: &str, text: &str) -> String {
    format!(
        "{}\n{}\n",
        serde_json::json!({"type": "thread.started", "thread_id": session_id}),
        serde_json::json!({"type": "item.completed", "item": {"type": "agent_message", "text": text}}),
    )
}
