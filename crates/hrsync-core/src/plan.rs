use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value::CellValue;

/// Free-form event details (dates, reason, duration, decision metadata).
pub type EventContext = Map<String, Value>;

/// Column writes and column creations that reflect one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlan {
    #[serde(default)]
    pub updates: BTreeMap<String, CellValue>,
    #[serde(default)]
    pub new_columns: Vec<String>,
}

impl UpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.new_columns.is_empty()
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.updates.insert(column.into(), value.into());
    }

    pub fn add_new_column(&mut self, column: impl Into<String>) {
        let column = column.into();
        if !self.new_columns.contains(&column) {
            self.new_columns.push(column);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Approved,
    Rejected,
    Other(String),
}

impl EventOutcome {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "applied" => Self::Applied,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    /// Value written to status columns.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Applied | Self::Other(_) => "Pending",
        }
    }
}

/// Event name split into action and outcome, e.g. `leave_request_approved` becomes action
/// `leave_request` with outcome `approved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventName {
    pub raw: String,
    pub action: String,
    pub outcome: EventOutcome,
}

impl EventName {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        let (action, outcome) = match normalized.rsplit_once('_') {
            Some((action, outcome)) if !action.is_empty() => {
                (action.to_string(), EventOutcome::parse(outcome))
            }
            _ => (normalized.clone(), EventOutcome::Applied),
        };
        Self {
            raw: raw.to_string(),
            action,
            outcome,
        }
    }

    /// Keyword used to find related columns: the first segment of the action.
    pub fn family(&self) -> &str {
        self.action.split('_').next().unwrap_or(&self.action)
    }

    pub fn family_title(&self) -> String {
        let family = self.family();
        let mut chars = family.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => "Request".to_string(),
        }
    }
}

/// Non-empty textual context value; numbers are rendered.
pub fn context_text(context: &EventContext, key: &str) -> Option<String> {
    match context.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(|n| CellValue::Number(n).render()),
        _ => None,
    }
}

/// Numeric context value; numeric strings such as `"3"` are accepted.
pub fn context_number(context: &EventContext, key: &str) -> Option<f64> {
    match context.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}
