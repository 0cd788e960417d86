use anyhow::Result;
use serde_json::Value;

use crate::plan::EventContext;
use crate::value::Record;

/// Everything a plan generation strategy sees about one event.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub headers: &'a [String],
    pub record: &'a Record,
    pub event_name: &'a str,
    pub context: &'a EventContext,
    pub primary_key: &'a str,
}

/// Pluggable decision-maker for update plans.
///
/// Implementations return raw JSON shaped like `{"updates": {...}, "new_columns": [...]}`;
/// the planner validates the shape and falls back to deterministic planning on any error.
pub trait PlanStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &PlanRequest<'_>) -> Result<Value>;
}

/// Pluggable schema inference; output is validated against the header partition.
pub trait SchemaStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, headers: &[String]) -> Result<Value>;
}
