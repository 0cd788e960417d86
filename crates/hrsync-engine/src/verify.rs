use std::collections::BTreeMap;

use hrsync_core::{CellValue, RecordStore, SyncError, UpdatePlan, values_match};
use tracing::{debug, info, warn};

use crate::executor::{ExecutionResult, execute};

pub const DEFAULT_MAX_RETRIES: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMismatch {
    pub expected: CellValue,
    pub actual: CellValue,
}

/// Read-back comparison of the applied columns. Informational only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationReport {
    pub verified: BTreeMap<String, CellValue>,
    pub failed: BTreeMap<String, FieldMismatch>,
    /// Set when the record could not be re-read at all.
    pub error: Option<String>,
}

impl VerificationReport {
    pub fn verified_count(&self) -> usize {
        self.verified.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.error.is_none()
    }
}

pub fn verify(
    store: &mut dyn RecordStore,
    primary_key: &str,
    employee_id: &str,
    expected: &BTreeMap<String, CellValue>,
) -> VerificationReport {
    let mut report = VerificationReport::default();
    let record = match store.get_record_by_key(primary_key, employee_id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            report.error = Some(format!("row for {employee_id} disappeared"));
            return report;
        }
        Err(err) => {
            report.error = Some(format!("{err:#}"));
            return report;
        }
    };

    for (column, want) in expected {
        let actual = record.get(column).cloned().unwrap_or_default();
        if values_match(want, &actual) {
            report.verified.insert(column.clone(), actual);
        } else {
            report.failed.insert(
                column.clone(),
                FieldMismatch {
                    expected: want.clone(),
                    actual,
                },
            );
        }
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Executing,
    Verifying,
    Retry,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Done,
    Retry,
}

#[derive(Debug, Clone)]
pub struct VerifyStep {
    pub report: Option<VerificationReport>,
    pub next: NextAction,
}

#[derive(Debug, Clone)]
pub struct ControlledOutcome {
    pub execution: ExecutionResult,
    pub verification: Option<VerificationReport>,
    pub retry_count: u8,
    /// Columns created across every attempt.
    pub new_columns_created: Vec<String>,
    pub phases: Vec<SyncPhase>,
}

/// Execute, verify and retry transient failures up to `max_retries` extra attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_retries: u8,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryController {
    pub fn new(max_retries: u8) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    pub fn verify_and_maybe_retry(
        &self,
        store: &mut dyn RecordStore,
        execution: &ExecutionResult,
        primary_key: &str,
        employee_id: &str,
        retry_count: u8,
    ) -> VerifyStep {
        if execution.success {
            let report = verify(store, primary_key, employee_id, &execution.updates_applied);
            if !report.is_clean() {
                warn!(
                    employee_id,
                    failed = report.failed_count(),
                    error = report.error.as_deref().unwrap_or(""),
                    "verification found discrepancies"
                );
            }
            return VerifyStep {
                report: Some(report),
                next: NextAction::Done,
            };
        }

        let retryable = execution
            .error
            .as_ref()
            .is_none_or(SyncError::is_retryable);
        let next = if retryable && retry_count < self.max_retries {
            NextAction::Retry
        } else {
            NextAction::Done
        };
        VerifyStep { report: None, next }
    }

    pub fn run(
        &self,
        store: &mut dyn RecordStore,
        plan: &UpdatePlan,
        primary_key: &str,
        employee_id: &str,
    ) -> ControlledOutcome {
        let mut phase = SyncPhase::Executing;
        let mut phases = Vec::new();
        let mut retry_count = 0_u8;
        let mut created: Vec<String> = Vec::new();
        let mut execution = ExecutionResult::default();
        let mut verification = None;

        loop {
            phases.push(phase);
            phase = match phase {
                SyncPhase::Executing => {
                    execution = execute(store, plan, primary_key, employee_id);
                    for column in &execution.new_columns_created {
                        if !created.contains(column) {
                            created.push(column.clone());
                        }
                    }
                    SyncPhase::Verifying
                }
                SyncPhase::Verifying => {
                    let step = self.verify_and_maybe_retry(
                        store,
                        &execution,
                        primary_key,
                        employee_id,
                        retry_count,
                    );
                    verification = step.report;
                    match step.next {
                        NextAction::Retry => SyncPhase::Retry,
                        NextAction::Done => SyncPhase::Done,
                    }
                }
                SyncPhase::Retry => {
                    retry_count += 1;
                    info!(
                        employee_id,
                        attempt = retry_count + 1,
                        error = %execution.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                        "retrying sync"
                    );
                    execution.error = None;
                    SyncPhase::Executing
                }
                SyncPhase::Done => break,
            };
        }

        debug!(employee_id, retry_count, success = execution.success, "sync attempts finished");
        ControlledOutcome {
            execution,
            verification,
            retry_count,
            new_columns_created: created,
            phases,
        }
    }
}
