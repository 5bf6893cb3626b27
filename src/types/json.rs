//! JSON helpers shared by the protocol and validation code

use serde_json::Value;

/// Loose truthiness of a JSON value.
///
/// `null`, `false`, `0`, `NaN` and `""` are falsy; everything else is truthy,
/// including empty arrays and objects.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Truthiness of an optional field, absent counts as falsy
pub fn is_truthy_opt(value: Option<&Value>) -> bool {
    value.map(is_truthy).unwrap_or(false)
}
