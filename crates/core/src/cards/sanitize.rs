//! 7-bit cleaning of outbound hook requests.

use crate::constants::SANITIZE_REPLACEMENT;
use serde_json::{Map, Value};

/// A request body after sanitization.
#[derive(Clone, Debug, PartialEq)]
pub struct Sanitized {
    pub value: Value,

    /// True if any character had to be replaced.
    pub modified: bool,
}

/// Replace every non-ASCII character in string values and object keys with `?`.
pub fn sanitize(value: &Value) -> Sanitized {
    let mut modified = false;
    let value = clean_value(value, &mut modified);
    Sanitized { value, modified }
}

fn clean_value(value: &Value, modified: &mut bool) -> Value {
    match value {
        Value::String(s) => Value::String(clean_str(s, modified)),
        Value::Array(items) => Value::Array(items.iter().map(|v| clean_value(v, modified)).collect()),
        Value::Object(map) => {
            let mut cleaned = Map::with_capacity(map.len());
            for (key, v) in map {
                let key = clean_str(key, modified);
                let v = clean_value(v, modified);
                cleaned.insert(key, v);
            }
            Value::Object(cleaned)
        }
        other => other.clone(),
    }
}

fn clean_str(s: &str, modified: &mut bool) -> String {
    if s.is_ascii() {
        return s.to_string();
    }
    *modified = true;
    s.chars()
        .map(|c| if c.is_ascii() { c } else { SANITIZE_REPLACEMENT })
        .collect()
}
