use chrono::{DateTime, Utc};
use hrsync_core::{
    AUTHORITY_TARGET, ApprovalRequest, Decision, EventContext, NewApprovalRequest, Notification,
    NotificationKind, RequestStatus,
};
use hrsync_engine::SyncOutcome;
use hrsync_memory::HrStore;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::sweep::{SweepAction, SweepGuard, SweepPolicy, SweepReport};
use crate::target::SyncTarget;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("approval request not found: {0}")]
    NotFound(String),
    #[error("approval request {id} is already {status}")]
    AlreadyDecided { id: String, status: String },
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub fn parse_decision(raw: &str) -> Result<Decision, LifecycleError> {
    Decision::parse(raw).ok_or_else(|| {
        LifecycleError::InvalidDecision(format!("expected approve or reject, got '{raw}'"))
    })
}

/// Persists approval requests and drives record-store syncs on creation and decision.
pub struct ApprovalLifecycle {
    db: HrStore,
    target: Box<dyn SyncTarget>,
    policy: SweepPolicy,
    guard: SweepGuard,
}

impl ApprovalLifecycle {
    pub fn new(db: HrStore, target: Box<dyn SyncTarget>, policy: SweepPolicy) -> Self {
        Self {
            db,
            target,
            policy,
            guard: SweepGuard::new(),
        }
    }

    pub fn store(&self) -> &HrStore {
        &self.db
    }

    pub fn policy(&self) -> SweepPolicy {
        self.policy
    }

    pub fn create(&self, input: NewApprovalRequest) -> Result<ApprovalRequest, LifecycleError> {
        self.create_at(input, Utc::now())
    }

    pub fn create_at(
        &self,
        input: NewApprovalRequest,
        created_at: DateTime<Utc>,
    ) -> Result<ApprovalRequest, LifecycleError> {
        if input.employee_id.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "employee_id cannot be empty".to_string(),
            ));
        }
        if input.request_type.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "request_type cannot be empty".to_string(),
            ));
        }

        let request = ApprovalRequest::new(input, created_at);
        let announcement = Notification::new(
            &request.company_id,
            AUTHORITY_TARGET,
            NotificationKind::ApprovalRequest,
            format!("New {} Request", request.type_title()),
            format!(
                "{} has submitted a {} request. Priority: {}. Please review and take action.",
                request.display_name(),
                request.request_type,
                request.priority.as_str().to_uppercase()
            ),
        )
        .for_request(&request.id);
        self.db.submit_request(&request, &announcement)?;
        info!(
            request_id = %request.id,
            company_id = %request.company_id,
            request_type = %request.request_type,
            "approval request created"
        );

        self.sync_request(&request, &request.applied_event(), &creation_context(&request));
        Ok(request)
    }

    pub fn decide(
        &self,
        request_id: &str,
        decision: Decision,
        decided_by: &str,
        decision_note: Option<&str>,
    ) -> Result<ApprovalRequest, LifecycleError> {
        let decided_by = decided_by.trim();
        if decided_by.is_empty() {
            return Err(LifecycleError::InvalidDecision(
                "decided_by cannot be empty".to_string(),
            ));
        }
        let current = self
            .db
            .get_request(request_id)?
            .ok_or_else(|| LifecycleError::NotFound(request_id.to_string()))?;
        if !current.status.accepts_decision() {
            return Err(already_decided(&current));
        }

        let decision_note = decision_note.map(str::trim).filter(|note| !note.is_empty());
        let status = decision.status();
        let mut message = format!(
            "Your {} request has been {} by {}.",
            current.request_type,
            status.as_str(),
            decided_by
        );
        if let Some(note) = decision_note {
            message.push_str(&format!(" Note: {note}"));
        }
        let title = match status {
            RequestStatus::Approved => "Request Approved",
            _ => "Request Rejected",
        };
        let update = Notification::new(
            &current.company_id,
            &current.employee_id,
            NotificationKind::DecisionUpdate,
            title,
            message,
        )
        .for_request(&current.id);
        if !self.db.record_decision(
            request_id,
            status,
            decided_by,
            decision_note,
            Utc::now(),
            &update,
        )? {
            // Lost a race with another decision.
            let latest = self.db.get_request(request_id)?.unwrap_or(current);
            return Err(already_decided(&latest));
        }

        let request = self
            .db
            .get_request(request_id)?
            .ok_or_else(|| LifecycleError::NotFound(request_id.to_string()))?;
        info!(
            request_id = %request.id,
            status = status.as_str(),
            decided_by,
            "approval request decided"
        );

        self.sync_request(&request, &request.decision_event(), &decision_context(&request));
        Ok(request)
    }

    /// Reminds or escalates every stale pending request. Returns `None` when another sweep
    /// is still running.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Option<SweepReport>, LifecycleError> {
        let Some(_run) = self.guard.try_begin() else {
            warn!("sweep already running, skipping tick");
            return Ok(None);
        };

        let candidates = self.db.list_sweep_candidates()?;
        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };
        for request in &candidates {
            let Some(action) = self.policy.action_for(request, now) else {
                continue;
            };
            match self.apply_sweep_action(request, action) {
                Ok(true) => match action {
                    SweepAction::Escalate => report.escalations += 1,
                    SweepAction::Remind => report.reminders_sent += 1,
                },
                Ok(false) => {}
                Err(err) => {
                    report.errors += 1;
                    error!(request_id = %request.id, error = %err, "sweep item failed");
                }
            }
        }

        info!(
            scanned = report.scanned,
            reminders = report.reminders_sent,
            escalations = report.escalations,
            errors = report.errors,
            "sweep finished"
        );
        Ok(Some(report))
    }

    pub fn sweep_guard(&self) -> &SweepGuard {
        &self.guard
    }

    fn apply_sweep_action(
        &self,
        request: &ApprovalRequest,
        action: SweepAction,
    ) -> anyhow::Result<bool> {
        let applied = match action {
            SweepAction::Escalate => {
                let escalation = Notification::new(
                    &request.company_id,
                    AUTHORITY_TARGET,
                    NotificationKind::Escalation,
                    format!(
                        "ESCALATED: {} from {}",
                        request.request_type,
                        request.display_name()
                    ),
                    format!(
                        "This request has been pending for over {} hours and has been escalated.",
                        self.policy.escalation_hours()
                    ),
                )
                .for_request(&request.id);
                self.db.mark_escalated(&request.id, &escalation)?
            }
            SweepAction::Remind => {
                let reminder = Notification::new(
                    &request.company_id,
                    AUTHORITY_TARGET,
                    NotificationKind::Reminder,
                    format!(
                        "Reminder: Pending {} from {}",
                        request.request_type,
                        request.display_name()
                    ),
                    format!(
                        "This request has been waiting for over {} hours. Please take action.",
                        self.policy.reminder_hours()
                    ),
                )
                .for_request(&request.id);
                self.db.mark_reminder_sent(&request.id, &reminder)?
            }
        };
        if !applied {
            return Ok(false);
        }
        info!(request_id = %request.id, action = ?action, "sweep action applied");
        Ok(true)
    }

    /// Sync failures are logged and never surface to the caller.
    fn sync_request(&self, request: &ApprovalRequest, event_name: &str, context: &EventContext) {
        match self.target.sync(
            &self.db,
            &request.company_id,
            &request.employee_id,
            event_name,
            context,
        ) {
            Ok(outcome) => trace_outcome(request, event_name, &outcome),
            Err(err) => warn!(
                request_id = %request.id,
                event = event_name,
                error = %err,
                "record sync skipped"
            ),
        }
    }
}

fn already_decided(request: &ApprovalRequest) -> LifecycleError {
    LifecycleError::AlreadyDecided {
        id: request.id.clone(),
        status: request.status.as_str().to_string(),
    }
}

fn trace_outcome(request: &ApprovalRequest, event_name: &str, outcome: &SyncOutcome) {
    let verified = outcome
        .verification
        .as_ref()
        .map_or(0, |report| report.verified_count());
    let mismatched = outcome
        .verification
        .as_ref()
        .map_or(0, |report| report.failed_count());
    if outcome.success {
        info!(
            request_id = %request.id,
            event = event_name,
            updates = ?outcome.updates_applied.keys().collect::<Vec<_>>(),
            new_columns = ?outcome.new_columns_created,
            verified,
            mismatched,
            "record synced"
        );
    } else {
        warn!(
            request_id = %request.id,
            event = event_name,
            retries = outcome.retry_count,
            error = %outcome.error.as_ref().map(ToString::to_string).unwrap_or_default(),
            "record sync failed"
        );
    }
}

fn insert_text(context: &mut EventContext, key: &str, value: Option<&str>) {
    context.insert(
        key.to_string(),
        value.map_or(Value::Null, |text| Value::String(text.to_string())),
    );
}

/// Context for `<type>_applied`. Request details win over the generated keys.
pub fn creation_context(request: &ApprovalRequest) -> EventContext {
    let mut context = EventContext::new();
    context.insert("request_type".to_string(), json!(request.request_type));
    context.insert("status".to_string(), json!(request.status.as_str()));
    context.insert("priority".to_string(), json!(request.priority.as_str()));
    insert_text(&mut context, "employee_name", request.employee_name.as_deref());
    context.insert(
        "created_at".to_string(),
        json!(request.created_at.format("%d %B %Y").to_string()),
    );
    insert_text(&mut context, "context_message", request.context_message.as_deref());
    context.extend(request.details.clone());
    context
}

/// Context for `<type>_<approved|rejected>`.
pub fn decision_context(request: &ApprovalRequest) -> EventContext {
    let mut context = EventContext::new();
    context.insert("request_type".to_string(), json!(request.request_type));
    context.insert("new_status".to_string(), json!(request.status.as_str()));
    context.insert(
        "decision_note".to_string(),
        json!(request.decision_note.clone().unwrap_or_default()),
    );
    context.insert(
        "decided_by".to_string(),
        json!(request.decided_by.clone().unwrap_or_default()),
    );
    context.insert(
        "decided_at".to_string(),
        json!(
            request
                .decided_at
                .map(|at| at.format("%d %B %Y %H:%M").to_string())
                .unwrap_or_default()
        ),
    );
    insert_text(&mut context, "employee_name", request.employee_name.as_deref());
    context.extend(request.details.clone());
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hrsync_core::RequestPriority;
    use serde_json::Map;

    fn request() -> ApprovalRequest {
        let mut details = Map::new();
        details.insert("duration".to_string(), json!(3));
        details.insert("priority".to_string(), json!("from-details"));
        ApprovalRequest::new(
            NewApprovalRequest {
                company_id: "acme".to_string(),
                employee_id: "E1".to_string(),
                employee_name: Some("Asha".to_string()),
                request_type: "leave".to_string(),
                details,
                context_message: None,
                priority: RequestPriority::High,
                assigned_role: None,
            },
            Utc.with_ymd_and_hms(2025, 3, 4, 9, 30, 0).single().expect("date"),
        )
    }

    #[test]
    fn creation_context_formats_date_and_merges_details() {
        let context = creation_context(&request());
        assert_eq!(context["created_at"], json!("04 March 2025"));
        assert_eq!(context["status"], json!("pending"));
        assert_eq!(context["duration"], json!(3));
        assert_eq!(context["priority"], json!("from-details"));
        assert_eq!(context["context_message"], Value::Null);
    }

    #[test]
    fn decision_context_carries_decision_metadata() {
        let mut decided = request();
        decided.status = RequestStatus::Approved;
        decided.decided_by = Some("mgr-1".to_string());
        decided.decided_at = Utc.with_ymd_and_hms(2025, 3, 5, 14, 5, 0).single();
        let context = decision_context(&decided);
        assert_eq!(context["new_status"], json!("approved"));
        assert_eq!(context["decided_by"], json!("mgr-1"));
        assert_eq!(context["decided_at"], json!("05 March 2025 14:05"));
        assert_eq!(context["decision_note"], json!(""));
        assert_eq!(context["duration"], json!(3));
    }

    #[test]
    fn decisions_parse_leniently() {
        assert_eq!(parse_decision("Approved").expect("approve"), Decision::Approve);
        assert!(matches!(
            parse_decision("maybe"),
            Err(LifecycleError::InvalidDecision(_))
        ));
    }
}
