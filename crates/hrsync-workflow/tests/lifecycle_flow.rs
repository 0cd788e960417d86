use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use hrsync_core::{
    AUTHORITY_TARGET, Decision, EventContext, NewApprovalRequest, NotificationKind,
    RequestPriority, RequestStatus,
};
use hrsync_engine::SyncOutcome;
use hrsync_memory::HrStore;
use hrsync_workflow::{ApprovalLifecycle, LifecycleError, SweepPolicy, SyncTarget};
use serde_json::{Map, json};
use tempfile::{TempDir, tempdir};

type Calls = Arc<Mutex<Vec<(String, String, EventContext)>>>;

struct RecordingTarget {
    calls: Calls,
    fail: bool,
}

impl SyncTarget for RecordingTarget {
    fn sync(
        &self,
        _db: &HrStore,
        _company_id: &str,
        employee_id: &str,
        event_name: &str,
        context: &EventContext,
    ) -> Result<SyncOutcome> {
        self.calls.lock().expect("calls lock").push((
            employee_id.to_string(),
            event_name.to_string(),
            context.clone(),
        ));
        if self.fail {
            return Err(anyhow!("record store offline"));
        }
        Ok(SyncOutcome {
            success: true,
            updates_applied: BTreeMap::new(),
            new_columns_created: Vec::new(),
            error: None,
            verification: None,
            retry_count: 0,
            plan_source: None,
            schema: None,
            schema_refreshed: false,
        })
    }
}

fn lifecycle(fail: bool) -> (TempDir, ApprovalLifecycle, Calls) {
    let tmp = tempdir().expect("tempdir");
    let db = HrStore::open(&tmp.path().join("hrsync.db")).expect("open db");
    let calls = Calls::default();
    let target = RecordingTarget {
        calls: Arc::clone(&calls),
        fail,
    };
    let lifecycle = ApprovalLifecycle::new(db, Box::new(target), SweepPolicy::default());
    (tmp, lifecycle, calls)
}

fn leave(employee_id: &str) -> NewApprovalRequest {
    let mut details = Map::new();
    details.insert("duration".to_string(), json!(2));
    details.insert("reason".to_string(), json!("family function"));
    NewApprovalRequest {
        company_id: "acme".to_string(),
        employee_id: employee_id.to_string(),
        employee_name: Some("Asha".to_string()),
        request_type: "leave".to_string(),
        details,
        context_message: Some("Need two days off".to_string()),
        priority: RequestPriority::High,
        assigned_role: None,
    }
}

fn authority_inbox(lifecycle: &ApprovalLifecycle, kind: NotificationKind) -> usize {
    lifecycle
        .store()
        .list_notifications("acme", AUTHORITY_TARGET, false)
        .expect("inbox")
        .iter()
        .filter(|n| n.kind == kind)
        .count()
}

#[test]
fn creation_notifies_authority_and_syncs_applied_event() {
    let (_tmp, lifecycle, calls) = lifecycle(false);
    let request = lifecycle.create(leave("E1")).expect("create");
    assert_eq!(request.status, RequestStatus::Pending);

    let inbox = lifecycle
        .store()
        .list_notifications("acme", AUTHORITY_TARGET, true)
        .expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].title, "New Leave Request");
    assert!(inbox[0].message.contains("Priority: HIGH"));
    assert_eq!(inbox[0].related_request_id.as_deref(), Some(request.id.as_str()));

    let calls = calls.lock().expect("calls");
    assert_eq!(calls.len(), 1);
    let (employee, event, context) = &calls[0];
    assert_eq!(employee, "E1");
    assert_eq!(event, "leave_applied");
    assert_eq!(context["duration"], json!(2));
    assert_eq!(context["status"], json!("pending"));
    assert_eq!(context["context_message"], json!("Need two days off"));
}

#[test]
fn sync_failure_does_not_block_creation_or_decision() {
    let (_tmp, lifecycle, calls) = lifecycle(true);
    let request = lifecycle.create(leave("E1")).expect("create despite sync failure");
    assert!(
        lifecycle
            .store()
            .get_request(&request.id)
            .expect("get")
            .is_some()
    );

    let decided = lifecycle
        .decide(&request.id, Decision::Reject, "mgr-1", None)
        .expect("decide despite sync failure");
    assert_eq!(decided.status, RequestStatus::Rejected);
    assert_eq!(calls.lock().expect("calls").len(), 2);
}

#[test]
fn decision_notifies_employee_and_syncs_outcome() {
    let (_tmp, lifecycle, calls) = lifecycle(false);
    let request = lifecycle.create(leave("E1")).expect("create");

    let decided = lifecycle
        .decide(&request.id, Decision::Approve, "mgr-1", Some("enjoy"))
        .expect("decide");
    assert_eq!(decided.status, RequestStatus::Approved);
    assert_eq!(decided.decided_by.as_deref(), Some("mgr-1"));
    assert!(decided.decided_at.is_some());

    let inbox = lifecycle
        .store()
        .list_notifications("acme", "E1", false)
        .expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::DecisionUpdate);
    assert_eq!(inbox[0].title, "Request Approved");
    assert!(inbox[0].message.ends_with("by mgr-1. Note: enjoy"));

    let calls = calls.lock().expect("calls");
    let (_, event, context) = calls.last().expect("decision sync");
    assert_eq!(event, "leave_approved");
    assert_eq!(context["decided_by"], json!("mgr-1"));
    assert_eq!(context["new_status"], json!("approved"));
    assert_eq!(context["reason"], json!("family function"));
}

#[test]
fn terminal_requests_reject_new_decisions() {
    let (_tmp, lifecycle, calls) = lifecycle(false);
    let request = lifecycle.create(leave("E1")).expect("create");
    lifecycle
        .decide(&request.id, Decision::Approve, "mgr-1", None)
        .expect("first decision");

    let err = lifecycle
        .decide(&request.id, Decision::Reject, "mgr-2", None)
        .expect_err("already decided");
    assert!(matches!(
        err,
        LifecycleError::AlreadyDecided { ref status, .. } if status == "approved"
    ));
    assert_eq!(calls.lock().expect("calls").len(), 2);

    assert!(matches!(
        lifecycle.decide("missing", Decision::Approve, "mgr-1", None),
        Err(LifecycleError::NotFound(_))
    ));
    assert!(matches!(
        lifecycle.decide(&request.id, Decision::Approve, "  ", None),
        Err(LifecycleError::InvalidDecision(_))
    ));
}

#[test]
fn blank_employee_is_rejected_before_persisting() {
    let (_tmp, lifecycle, calls) = lifecycle(false);
    assert!(matches!(
        lifecycle.create(leave("   ")),
        Err(LifecycleError::InvalidRequest(_))
    ));
    assert!(calls.lock().expect("calls").is_empty());
}

#[test]
fn request_aged_80h_is_escalated_once_across_sweeps() {
    let (_tmp, lifecycle, _calls) = lifecycle(false);
    let now = Utc::now();
    let request = lifecycle
        .create_at(leave("E1"), now - Duration::hours(80))
        .expect("create");

    let first = lifecycle.sweep(now).expect("sweep").expect("ran");
    assert_eq!(first.escalations, 1);
    assert_eq!(first.reminders_sent, 0);
    let second = lifecycle
        .sweep(now + Duration::minutes(5))
        .expect("sweep")
        .expect("ran");
    assert_eq!(second.escalations, 0);
    assert_eq!(second.scanned, 0);

    let stored = lifecycle
        .store()
        .get_request(&request.id)
        .expect("get")
        .expect("row");
    assert_eq!(stored.status, RequestStatus::Escalated);
    assert!(stored.escalated);
    assert_eq!(authority_inbox(&lifecycle, NotificationKind::Escalation), 1);
}

#[test]
fn request_aged_75h_without_reminder_escalates_directly() {
    let (_tmp, lifecycle, _calls) = lifecycle(false);
    let now = Utc::now();
    let request = lifecycle
        .create_at(leave("E1"), now - Duration::hours(75))
        .expect("create");

    lifecycle.sweep(now).expect("sweep");

    let stored = lifecycle
        .store()
        .get_request(&request.id)
        .expect("get")
        .expect("row");
    assert!(stored.escalated);
    assert!(!stored.reminder_sent);
    assert_eq!(authority_inbox(&lifecycle, NotificationKind::Escalation), 1);
    assert_eq!(authority_inbox(&lifecycle, NotificationKind::Reminder), 0);
}

#[test]
fn request_aged_50h_gets_one_reminder_then_escalates_later() {
    let (_tmp, lifecycle, _calls) = lifecycle(false);
    let now = Utc::now();
    let request = lifecycle
        .create_at(leave("E1"), now - Duration::hours(50))
        .expect("create");

    let first = lifecycle.sweep(now).expect("sweep").expect("ran");
    assert_eq!(first.reminders_sent, 1);
    let again = lifecycle
        .sweep(now + Duration::hours(1))
        .expect("sweep")
        .expect("ran");
    assert_eq!(again.reminders_sent, 0);
    assert_eq!(authority_inbox(&lifecycle, NotificationKind::Reminder), 1);

    let later = lifecycle
        .sweep(now + Duration::hours(23))
        .expect("sweep")
        .expect("ran");
    assert_eq!(later.escalations, 1);

    let stored = lifecycle
        .store()
        .get_request(&request.id)
        .expect("get")
        .expect("row");
    assert!(stored.reminder_sent);
    assert_eq!(stored.status, RequestStatus::Escalated);
}

#[test]
fn escalated_requests_can_still_be_decided() {
    let (_tmp, lifecycle, _calls) = lifecycle(false);
    let now = Utc::now();
    let request = lifecycle
        .create_at(leave("E1"), now - Duration::hours(90))
        .expect("create");
    lifecycle.sweep(now).expect("sweep");

    let decided = lifecycle
        .decide(&request.id, Decision::Approve, "hr-head", None)
        .expect("decide escalated");
    assert_eq!(decided.status, RequestStatus::Approved);
    assert!(decided.escalated);
}

#[test]
fn overlapping_sweep_is_skipped() {
    let (_tmp, lifecycle, _calls) = lifecycle(false);
    let now = Utc::now();
    lifecycle
        .create_at(leave("E1"), now - Duration::hours(80))
        .expect("create");

    let held = lifecycle.sweep_guard().try_begin().expect("guard");
    assert!(lifecycle.sweep(now).expect("sweep").is_none());
    drop(held);

    let report = lifecycle.sweep(now).expect("sweep").expect("ran");
    assert_eq!(report.escalations, 1);
}
