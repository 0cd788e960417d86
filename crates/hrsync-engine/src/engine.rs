use std::collections::BTreeMap;
use std::sync::Arc;

use hrsync_core::{CellValue, EventContext, RecordStore, SchemaMap, SyncError};
use tracing::{info, warn};

use crate::analyzer::SchemaAnalyzer;
use crate::cache::SchemaCache;
use crate::planner::{PlanSource, Planner};
use crate::verify::{RetryController, VerificationReport};

/// One event to reflect into one employee's row.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub connection_id: &'a str,
    pub employee_id: &'a str,
    pub event_name: &'a str,
    pub context: &'a EventContext,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub updates_applied: BTreeMap<String, CellValue>,
    pub new_columns_created: Vec<String>,
    pub error: Option<SyncError>,
    pub verification: Option<VerificationReport>,
    pub retry_count: u8,
    pub plan_source: Option<PlanSource>,
    pub schema: Option<SchemaMap>,
    /// The schema map was recomputed during this sync and should be persisted.
    pub schema_refreshed: bool,
}

impl SyncOutcome {
    fn aborted(error: SyncError) -> Self {
        Self {
            success: false,
            updates_applied: BTreeMap::new(),
            new_columns_created: Vec::new(),
            error: Some(error),
            verification: None,
            retry_count: 0,
            plan_source: None,
            schema: None,
            schema_refreshed: false,
        }
    }
}

/// Analyze, plan, execute, verify and retry for a single event.
pub struct SyncEngine {
    analyzer: SchemaAnalyzer,
    planner: Planner,
    controller: RetryController,
    cache: Arc<SchemaCache>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(
            SchemaAnalyzer::deterministic(),
            Planner::deterministic(),
            RetryController::default(),
        )
    }
}

impl SyncEngine {
    pub fn new(analyzer: SchemaAnalyzer, planner: Planner, controller: RetryController) -> Self {
        Self {
            analyzer,
            planner,
            controller,
            cache: Arc::new(SchemaCache::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn analyzer(&self) -> &SchemaAnalyzer {
        &self.analyzer
    }

    pub fn sync(&self, store: &mut dyn RecordStore, request: SyncRequest<'_>) -> SyncOutcome {
        let outcome = self.run(store, request);
        match &outcome.error {
            None => info!(
                employee_id = request.employee_id,
                event = request.event_name,
                updates = outcome.updates_applied.len(),
                new_columns = outcome.new_columns_created.len(),
                retries = outcome.retry_count,
                plan = outcome.plan_source.as_ref().map_or("none", PlanSource::label),
                "sync applied"
            ),
            Some(err) => warn!(
                employee_id = request.employee_id,
                event = request.event_name,
                retries = outcome.retry_count,
                error = %err,
                "sync failed"
            ),
        }
        outcome
    }

    fn run(&self, store: &mut dyn RecordStore, request: SyncRequest<'_>) -> SyncOutcome {
        let headers = match store.refresh_headers() {
            Ok(headers) => headers,
            Err(err) => return SyncOutcome::aborted(SyncError::transient(&err)),
        };
        if headers.is_empty() {
            return SyncOutcome::aborted(SyncError::Configuration(
                "record store has no header row".to_string(),
            ));
        }

        let resolved = self
            .cache
            .resolve(request.connection_id, &headers, &self.analyzer);
        let schema = resolved.map;
        if !schema.has_primary_key_in(&headers) {
            return SyncOutcome::aborted(SyncError::Configuration(format!(
                "primary key '{}' is not a column",
                schema.primary_key
            )));
        }

        let record = match store.get_record_by_key(&schema.primary_key, request.employee_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                let error = SyncError::NotFound(format!(
                    "no row with {} = {}",
                    schema.primary_key, request.employee_id
                ));
                return SyncOutcome {
                    schema: Some(schema),
                    schema_refreshed: resolved.refreshed,
                    ..SyncOutcome::aborted(error)
                };
            }
            Err(err) => return SyncOutcome::aborted(SyncError::transient(&err)),
        };

        let planned = self.planner.plan(
            &schema,
            &headers,
            &record,
            request.event_name,
            request.context,
        );
        let controlled =
            self.controller
                .run(store, &planned.plan, &schema.primary_key, request.employee_id);

        SyncOutcome {
            success: controlled.execution.success,
            updates_applied: controlled.execution.updates_applied,
            new_columns_created: controlled.new_columns_created,
            error: controlled.execution.error,
            verification: controlled.verification,
            retry_count: controlled.retry_count,
            plan_source: Some(planned.source),
            schema: Some(schema),
            schema_refreshed: resolved.refreshed,
        }
    }
}
