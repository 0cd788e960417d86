use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use hrsync_core::{
    CellValue, EventContext, InMemoryStore, PlanRequest, PlanStrategy, Record, RecordStore,
    SyncError,
};
use hrsync_engine::{
    PlanSource, Planner, RetryController, SchemaAnalyzer, SchemaCache, SyncEngine, SyncRequest,
};
use serde_json::{Value, json};

fn leave_sheet() -> InMemoryStore {
    let mut store = InMemoryStore::default();
    store
        .connect(&json!({
            "headers": ["Emp ID", "Name", "Leave Status", "Leave Balance"],
            "records": [
                {"Emp ID": "E1", "Name": "Asha", "Leave Status": "", "Leave Balance": 10},
                {"Emp ID": "E2", "Name": "Ravi", "Leave Status": "", "Leave Balance": 6}
            ]
        }))
        .expect("seed sheet");
    store
}

fn context(value: Value) -> EventContext {
    value.as_object().cloned().unwrap_or_default()
}

fn row(store: &mut InMemoryStore, id: &str) -> Record {
    store
        .get_record_by_key("Emp ID", id)
        .expect("lookup")
        .expect("row exists")
}

#[test]
fn approved_leave_updates_status_and_balance() {
    let mut store = leave_sheet();
    let engine = SyncEngine::default();
    let ctx = context(json!({"duration": 2, "start_date": "2026-10-20"}));

    let outcome = engine.sync(
        &mut store,
        SyncRequest {
            connection_id: "acme-hr",
            employee_id: "E1",
            event_name: "leave_approved",
            context: &ctx,
        },
    );

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(
        outcome.updates_applied,
        BTreeMap::from([
            ("Leave Balance".to_string(), CellValue::Number(8.0)),
            ("Leave Status".to_string(), CellValue::from("Approved")),
        ])
    );
    assert!(outcome.new_columns_created.is_empty());
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(outcome.plan_source, Some(PlanSource::Fallback));
    assert!(outcome.schema_refreshed);
    let report = outcome.verification.expect("verification report");
    assert_eq!(report.verified_count(), 2);
    assert_eq!(report.failed_count(), 0);

    let asha = row(&mut store, "E1");
    assert_eq!(asha.get("Leave Balance"), Some(&CellValue::Number(8.0)));
    let ravi = row(&mut store, "E2");
    assert_eq!(ravi.get("Leave Balance"), Some(&CellValue::Number(6.0)));
}

#[test]
fn repeated_event_creates_status_column_once() {
    let mut store = InMemoryStore::default();
    store
        .connect(&json!({
            "headers": ["Emp ID", "Name"],
            "records": [{"Emp ID": "E7", "Name": "Meera"}]
        }))
        .expect("seed sheet");
    let engine = SyncEngine::default();
    let ctx = EventContext::new();
    let request = SyncRequest {
        connection_id: "acme-hr",
        employee_id: "e7",
        event_name: "expense_applied",
        context: &ctx,
    };

    let first = engine.sync(&mut store, request);
    assert_eq!(first.new_columns_created, vec!["Expense Request Status".to_string()]);
    let second = engine.sync(&mut store, request);
    assert!(second.success);
    assert!(second.new_columns_created.is_empty());
    assert!(!second.schema_refreshed);

    let headers = store.get_headers().expect("headers");
    assert_eq!(
        headers.iter().filter(|h| *h == "Expense Request Status").count(),
        1
    );
}

#[test]
fn unknown_employee_is_not_found_without_retries() {
    let mut store = leave_sheet();
    let ctx = EventContext::new();
    let outcome = SyncEngine::default().sync(
        &mut store,
        SyncRequest {
            connection_id: "acme-hr",
            employee_id: "E404",
            event_name: "leave_applied",
            context: &ctx,
        },
    );
    assert!(!outcome.success);
    assert_eq!(outcome.retry_count, 0);
    assert!(matches!(outcome.error, Some(SyncError::NotFound(_))));
}

#[test]
fn empty_sheet_is_a_configuration_error() {
    let mut store = InMemoryStore::new(Vec::new());
    let ctx = EventContext::new();
    let outcome = SyncEngine::default().sync(
        &mut store,
        SyncRequest {
            connection_id: "blank",
            employee_id: "E1",
            event_name: "leave_applied",
            context: &ctx,
        },
    );
    assert!(matches!(outcome.error, Some(SyncError::Configuration(_))));
}

struct KeyRewriter;

impl PlanStrategy for KeyRewriter {
    fn name(&self) -> &str {
        "key-rewriter"
    }

    fn generate(&self, request: &PlanRequest<'_>) -> Result<Value> {
        Ok(json!({
            "updates": {
                request.primary_key: "HACKED",
                "Leave Status": "Approved",
                "Last Approver": "Priya"
            }
        }))
    }
}

#[test]
fn strategy_plan_never_touches_primary_key() {
    let mut store = leave_sheet();
    let engine = SyncEngine::new(
        SchemaAnalyzer::deterministic(),
        Planner::with_strategy(Arc::new(KeyRewriter)),
        RetryController::default(),
    );
    let ctx = EventContext::new();
    let outcome = engine.sync(
        &mut store,
        SyncRequest {
            connection_id: "acme-hr",
            employee_id: "E2",
            event_name: "leave_approved",
            context: &ctx,
        },
    );
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.plan_source, Some(PlanSource::Strategy("key-rewriter".to_string())));
    assert_eq!(outcome.new_columns_created, vec!["Last Approver".to_string()]);
    assert!(!outcome.updates_applied.contains_key("Emp ID"));
    let ravi = row(&mut store, "E2");
    assert_eq!(ravi.get("Emp ID"), Some(&CellValue::from("E2")));
}

struct OfflineStrategy;

impl PlanStrategy for OfflineStrategy {
    fn name(&self) -> &str {
        "offline"
    }

    fn generate(&self, _request: &PlanRequest<'_>) -> Result<Value> {
        bail!("request timed out")
    }
}

#[test]
fn strategy_outage_still_syncs_with_fallback() {
    let mut store = leave_sheet();
    let engine = SyncEngine::new(
        SchemaAnalyzer::deterministic(),
        Planner::with_strategy(Arc::new(OfflineStrategy)),
        RetryController::default(),
    );
    let ctx = EventContext::new();
    let outcome = engine.sync(
        &mut store,
        SyncRequest {
            connection_id: "acme-hr",
            employee_id: "E1",
            event_name: "leave_rejected",
            context: &ctx,
        },
    );
    assert!(outcome.success);
    assert_eq!(outcome.plan_source, Some(PlanSource::Fallback));
    assert_eq!(
        row(&mut store, "E1").get("Leave Status"),
        Some(&CellValue::from("Rejected"))
    );
}

#[test]
fn renamed_key_column_triggers_reanalysis() {
    let cache = Arc::new(SchemaCache::new());
    let engine = SyncEngine::default().with_cache(Arc::clone(&cache));
    let ctx = EventContext::new();

    let mut before = leave_sheet();
    engine.sync(
        &mut before,
        SyncRequest {
            connection_id: "acme-hr",
            employee_id: "E1",
            event_name: "leave_applied",
            context: &ctx,
        },
    );
    assert_eq!(cache.get("acme-hr").map(|m| m.primary_key), Some("Emp ID".to_string()));

    let mut after = InMemoryStore::default();
    after
        .connect(&json!({
            "headers": ["Staff Code", "Name", "Leave Status"],
            "records": [{"Staff Code": "S1", "Name": "Asha", "Leave Status": ""}]
        }))
        .expect("seed sheet");
    let outcome = engine.sync(
        &mut after,
        SyncRequest {
            connection_id: "acme-hr",
            employee_id: "S1",
            event_name: "leave_applied",
            context: &ctx,
        },
    );
    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome.schema_refreshed);
    assert_eq!(cache.get("acme-hr").map(|m| m.primary_key), Some("Staff Code".to_string()));
}
