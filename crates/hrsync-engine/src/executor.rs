use std::collections::{BTreeMap, BTreeSet};

use hrsync_core::{CellValue, RecordStore, SyncError, UpdatePlan};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub updates_applied: BTreeMap<String, CellValue>,
    pub new_columns_created: Vec<String>,
    pub error: Option<SyncError>,
}

impl ExecutionResult {
    fn failed(error: SyncError, new_columns_created: Vec<String>) -> Self {
        Self {
            success: false,
            updates_applied: BTreeMap::new(),
            new_columns_created,
            error: Some(error),
        }
    }
}

/// Applies one plan against one row: columns first, then a single batched write.
pub fn execute(
    store: &mut dyn RecordStore,
    plan: &UpdatePlan,
    primary_key: &str,
    employee_id: &str,
) -> ExecutionResult {
    if plan.is_empty() {
        return ExecutionResult {
            success: true,
            ..ExecutionResult::default()
        };
    }

    let mut headers = match store.get_headers() {
        Ok(headers) => headers,
        Err(err) => return ExecutionResult::failed(SyncError::transient(&err), Vec::new()),
    };
    if !headers.iter().any(|header| header == primary_key) {
        return ExecutionResult::failed(
            SyncError::Configuration(format!("primary key column '{primary_key}' not found")),
            Vec::new(),
        );
    }

    let mut created = Vec::new();
    let mut failed_columns = BTreeSet::new();
    for column in &plan.new_columns {
        if headers.contains(column) {
            continue;
        }
        match store.add_column(column, None) {
            Ok(true) => {
                debug!(column = %column, "column created");
                created.push(column.clone());
            }
            Ok(false) => {
                warn!(column = %column, "column was not created");
                failed_columns.insert(column.as_str());
            }
            Err(err) => {
                warn!(column = %column, error = %format!("{err:#}"), "column creation failed");
                failed_columns.insert(column.as_str());
            }
        }
    }

    if !created.is_empty() {
        headers = match store.refresh_headers() {
            Ok(headers) => headers,
            Err(err) => return ExecutionResult::failed(SyncError::transient(&err), created),
        };
    }

    let writable: BTreeMap<String, CellValue> = plan
        .updates
        .iter()
        .filter(|(column, _)| {
            let keep = !failed_columns.contains(column.as_str()) && headers.contains(column);
            if !keep {
                warn!(column = %column, "dropping update for missing column");
            }
            keep
        })
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();

    if writable.is_empty() {
        if plan.updates.is_empty() {
            return ExecutionResult {
                success: true,
                new_columns_created: created,
                ..ExecutionResult::default()
            };
        }
        return ExecutionResult::failed(
            SyncError::TransientWrite("no writable columns remain".to_string()),
            created,
        );
    }

    match store.update_record(primary_key, employee_id, &writable) {
        Ok(true) => ExecutionResult {
            success: true,
            updates_applied: writable,
            new_columns_created: created,
            error: None,
        },
        Ok(false) => ExecutionResult::failed(
            SyncError::NotFound(format!("row not found for {primary_key} = {employee_id}")),
            created,
        ),
        Err(err) => ExecutionResult::failed(SyncError::transient(&err), created),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use hrsync_core::{InMemoryStore, Record};
    use serde_json::Value;

    fn seeded() -> InMemoryStore {
        let mut record = Record::new();
        record.insert("Emp ID".to_string(), CellValue::from("E1"));
        record.insert("Name".to_string(), CellValue::from("Asha"));
        InMemoryStore::with_records(vec!["Emp ID".to_string(), "Name".to_string()], vec![record])
    }

    /// Delegates to an in-memory store but refuses to create one column.
    struct StubbornColumns {
        inner: InMemoryStore,
        refuse: &'static str,
    }

    impl RecordStore for StubbornColumns {
        fn connect(&mut self, config: &Value) -> Result<()> {
            self.inner.connect(config)
        }
        fn get_headers(&mut self) -> Result<Vec<String>> {
            self.inner.get_headers()
        }
        fn get_all_records(&mut self) -> Result<Vec<Record>> {
            self.inner.get_all_records()
        }
        fn update_record(
            &mut self,
            key_column: &str,
            key_value: &str,
            updates: &BTreeMap<String, CellValue>,
        ) -> Result<bool> {
            self.inner.update_record(key_column, key_value, updates)
        }
        fn add_column(&mut self, name: &str, default_values: Option<&[CellValue]>) -> Result<bool> {
            if name == self.refuse {
                bail!("grid limit reached");
            }
            self.inner.add_column(name, default_values)
        }
        fn update_column_values(
            &mut self,
            column: &str,
            key_column: &str,
            values: &BTreeMap<String, CellValue>,
        ) -> Result<bool> {
            self.inner.update_column_values(column, key_column, values)
        }
        fn get_column_values(&mut self, column: &str) -> Result<Vec<CellValue>> {
            self.inner.get_column_values(column)
        }
    }

    #[test]
    fn empty_plan_is_trivial_success() {
        let mut store = seeded();
        let result = execute(&mut store, &UpdatePlan::default(), "Emp ID", "E1");
        assert!(result.success);
        assert!(result.updates_applied.is_empty());
    }

    #[test]
    fn creates_columns_then_writes() {
        let mut store = seeded();
        let mut plan = UpdatePlan::default();
        plan.set("Leave Request Status", "Pending");
        plan.add_new_column("Leave Request Status");

        let result = execute(&mut store, &plan, "Emp ID", " e1");
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.new_columns_created, vec!["Leave Request Status".to_string()]);
        let row = store
            .get_record_by_key("Emp ID", "E1")
            .expect("lookup")
            .expect("row");
        assert_eq!(row.get("Leave Request Status"), Some(&CellValue::from("Pending")));

        let again = execute(&mut store, &plan, "Emp ID", "E1");
        assert!(again.success);
        assert!(again.new_columns_created.is_empty());
        assert_eq!(store.headers().len(), 3);
    }

    #[test]
    fn missing_row_is_not_found() {
        let mut store = seeded();
        let mut plan = UpdatePlan::default();
        plan.set("Name", "Ravi");
        let result = execute(&mut store, &plan, "Emp ID", "E404");
        assert!(!result.success);
        assert!(matches!(result.error, Some(SyncError::NotFound(_))));
    }

    #[test]
    fn failed_column_drops_only_its_updates() {
        let mut store = StubbornColumns {
            inner: seeded(),
            refuse: "Bonus",
        };
        let mut plan = UpdatePlan::default();
        plan.set("Bonus", 500_i64);
        plan.set("Dept", "Ops");
        plan.add_new_column("Bonus");
        plan.add_new_column("Dept");

        let result = execute(&mut store, &plan, "Emp ID", "E1");
        assert!(result.success);
        assert_eq!(result.new_columns_created, vec!["Dept".to_string()]);
        assert_eq!(result.updates_applied.len(), 1);
        assert!(result.updates_applied.contains_key("Dept"));
    }
}
