use std::sync::Arc;

use hrsync_core::{
    CellValue, EventContext, EventName, PlanRequest, PlanStrategy, Record, SchemaMap,
    SyncError, UpdatePlan, normalize_key,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::fallback::fallback_plan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    Strategy(String),
    Fallback,
}

impl PlanSource {
    pub fn label(&self) -> &str {
        match self {
            Self::Strategy(name) => name,
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    pub plan: UpdatePlan,
    pub source: PlanSource,
    /// Why the strategy output was discarded, when it was.
    pub fallback_reason: Option<SyncError>,
}

/// Turns an event into an [`UpdatePlan`]. Never fails.
#[derive(Clone, Default)]
pub struct Planner {
    strategy: Option<Arc<dyn PlanStrategy>>,
}

impl Planner {
    pub fn deterministic() -> Self {
        Self { strategy: None }
    }

    pub fn with_strategy(strategy: Arc<dyn PlanStrategy>) -> Self {
        Self {
            strategy: Some(strategy),
        }
    }

    pub fn plan(
        &self,
        schema: &SchemaMap,
        headers: &[String],
        record: &Record,
        event_name: &str,
        context: &EventContext,
    ) -> PlannedUpdate {
        let event = EventName::parse(event_name);
        let (plan, source, fallback_reason) = match &self.strategy {
            Some(strategy) => {
                let request = PlanRequest {
                    headers,
                    record,
                    event_name,
                    context,
                    primary_key: &schema.primary_key,
                };
                let generated = strategy
                    .generate(&request)
                    .map_err(|err| SyncError::PlanGeneration(format!("{err:#}")))
                    .and_then(|raw| parse_plan(&raw));
                match generated {
                    Ok(plan) => (plan, PlanSource::Strategy(strategy.name().to_string()), None),
                    Err(err) => {
                        warn!(
                            strategy = strategy.name(),
                            event = event_name,
                            error = %err,
                            "falling back to deterministic plan"
                        );
                        (
                            fallback_plan(headers, record, &event, context),
                            PlanSource::Fallback,
                            Some(err),
                        )
                    }
                }
            }
            None => (
                fallback_plan(headers, record, &event, context),
                PlanSource::Fallback,
                None,
            ),
        };

        let plan = finalize(plan, &schema.primary_key, headers);
        debug!(
            event = event_name,
            source = source.label(),
            updates = plan.updates.len(),
            new_columns = plan.new_columns.len(),
            "update plan ready"
        );
        PlannedUpdate {
            plan,
            source,
            fallback_reason,
        }
    }
}

/// Validates raw strategy output: an object whose `updates` is an object of scalars and
/// whose optional `new_columns` is a list of strings.
pub fn parse_plan(raw: &Value) -> Result<UpdatePlan, SyncError> {
    let invalid = SyncError::PlanGeneration;
    let object = raw
        .as_object()
        .ok_or_else(|| invalid("plan is not a JSON object".to_string()))?;

    let updates = object
        .get("updates")
        .ok_or_else(|| invalid("plan has no updates".to_string()))?
        .as_object()
        .ok_or_else(|| invalid("updates is not an object".to_string()))?;

    let mut plan = UpdatePlan::default();
    for (column, value) in updates {
        let cell = CellValue::from_json(value)
            .ok_or_else(|| invalid(format!("update for '{column}' is not a scalar")))?;
        plan.set(column.clone(), cell);
    }

    match object.get("new_columns") {
        None | Some(Value::Null) => {}
        Some(Value::Array(columns)) => {
            for column in columns {
                let name = column
                    .as_str()
                    .ok_or_else(|| invalid("new_columns contains a non-string".to_string()))?;
                plan.add_new_column(name);
            }
        }
        Some(_) => return Err(invalid("new_columns is not a list".to_string())),
    }
    Ok(plan)
}

/// Safety pass applied to every plan regardless of origin.
fn finalize(plan: UpdatePlan, primary_key: &str, headers: &[String]) -> UpdatePlan {
    let key = normalize_key(primary_key);
    let mut out = UpdatePlan::default();

    for (column, value) in plan.updates {
        let trimmed = column.trim();
        if trimmed.is_empty() {
            continue;
        }
        if normalize_key(trimmed) == key {
            warn!(column = trimmed, "dropping update to primary key column");
            continue;
        }
        out.set(trimmed, value);
    }

    let candidates = plan
        .new_columns
        .iter()
        .map(|column| column.trim().to_string())
        .chain(out.updates.keys().cloned())
        .collect::<Vec<_>>();
    for column in candidates {
        if column.is_empty() || normalize_key(&column) == key || headers.contains(&column) {
            continue;
        }
        out.add_new_column(column);
    }
    out
}
