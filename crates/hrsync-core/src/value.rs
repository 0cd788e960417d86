use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row of the record store, keyed by column name.
pub type Record = BTreeMap<String, CellValue>;

/// Scalar cell content. The store has no column types, so numbers and text can appear
/// anywhere and an unset cell is `Empty`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    #[default]
    Empty,
}

impl CellValue {
    /// Integral numbers render without a fractional part so `8.0` and `8` look the same
    /// once written back to the sheet.
    pub fn render(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(text) => text.clone(),
            Self::Empty => String::new(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Number(_) | Self::Empty => None,
            Self::Text(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.render().trim().is_empty()
    }

    /// Converts a JSON scalar. Arrays and objects are not cell values.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Empty),
            Value::Bool(b) => Some(Self::Text(b.to_string())),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Value::from(*n as i64),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(text) => Value::String(text.clone()),
            Self::Empty => Value::Null,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Key comparison used for every row lookup: trimmed and case-insensitive.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn keys_match(left: &str, right: &str) -> bool {
    normalize_key(left) == normalize_key(right)
}

/// Verification equality: numeric when both sides parse as numbers, otherwise the
/// trimmed renderings must be identical.
pub fn values_match(expected: &CellValue, actual: &CellValue) -> bool {
    if let (Some(left), Some(right)) = (expected.as_number(), actual.as_number()) {
        return (left - right).abs() < 1e-9;
    }
    expected.render().trim() == actual.render().trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(CellValue::Number(8.0).render(), "8");
        assert_eq!(CellValue::Number(7.5).render(), "7.5");
        assert_eq!(CellValue::Number(8.0).to_json(), Value::from(8));
    }

    #[test]
    fn numeric_text_matches_number() {
        assert!(values_match(&CellValue::Number(8.0), &CellValue::from("8.0")));
        assert!(values_match(&CellValue::Number(8.0), &CellValue::from(" 8 ")));
        assert!(!values_match(&CellValue::Number(8.0), &CellValue::from("9")));
    }

    #[test]
    fn text_compares_trimmed_and_case_sensitive() {
        assert!(values_match(&CellValue::from("Approved"), &CellValue::from("Approved ")));
        assert!(!values_match(&CellValue::from("Approved"), &CellValue::from("approved")));
        assert!(values_match(&CellValue::Empty, &CellValue::from("  ")));
    }

    #[test]
    fn structured_json_is_not_a_cell() {
        assert!(CellValue::from_json(&serde_json::json!({"a": 1})).is_none());
        assert!(CellValue::from_json(&serde_json::json!([1])).is_none());
        assert_eq!(
            CellValue::from_json(&serde_json::json!(null)),
            Some(CellValue::Empty)
        );
    }

    #[test]
    fn key_matching_ignores_case_and_padding() {
        assert!(keys_match(" e1 ", "E1"));
        assert!(!keys_match("E1", "E10"));
    }
}
