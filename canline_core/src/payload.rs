//! Defensive field extraction for inbound bus payloads.
//!
//! Device firmware and the serial bridge disagree on field names and
//! sometimes send numbers as strings; readers here accept the known aliases
//! and both representations. Missing or unparseable values come back as
//! `None` and the caller decides whether that drops the message.

use serde_json::Value;

/// First non-empty string under any of `keys`, trimmed.
pub fn text(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(key).and_then(Value::as_str) {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// First integer under any of `keys`; numeric strings accepted.
pub fn integer(v: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match v.get(key) {
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Some(i);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(i) = s.trim().parse::<i64>() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// First finite float under any of `keys`; numeric strings accepted.
pub fn number(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        match v.get(key) {
            Some(Value::Number(n)) => {
                if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    return Some(f);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(f) = s.trim().parse::<f64>() {
                    if f.is_finite() {
                        return Some(f);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Last-resort target heuristic: a numeric SKU suffix names the fill volume
/// (e.g. "COKE_355" → 355.0). Returns 0.0 when the suffix is not numeric.
pub fn infer_target_from_sku(sku: &str) -> f64 {
    sku.rsplit('_')
        .next()
        .and_then(|tail| tail.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(0.0)
}
