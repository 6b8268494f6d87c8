use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, info};

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_KEYS: [&str; 6] = ["password", "token", "secret", "apikey", "auth", "key"];
/// Longest string value logged verbatim, in characters. File contents and
/// other bulky arguments are cut down to this.
const MAX_LOGGED_CHARS: usize = 256;

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}

/// Copy of `value` with every credential-looking field replaced and long
/// strings truncated, at any nesting depth.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize(value)
                    };
                    (key.clone(), value)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        Value::String(text) => Value::String(truncate(text)),
        other => other.clone(),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_LOGGED_CHARS) {
        Some((cut, _)) => format!("{}... ({} bytes)", &text[..cut], text.len()),
        None => text.to_string(),
    }
}

/// Emits the audit event for one finished operation.
pub fn record_outcome(
    agent: &str,
    operation: &str,
    params: &Value,
    success: bool,
    duration: Duration,
    failure: Option<&str>,
) {
    let params = sanitize(params);
    let duration_ms = duration.as_millis() as u64;
    if success {
        info!(agent, operation, %params, duration_ms, "Operation succeeded");
    } else {
        error!(
            agent,
            operation,
            %params,
            duration_ms,
            error = failure.unwrap_or("unknown error"),
            "Operation failed"
        );
    }
}
