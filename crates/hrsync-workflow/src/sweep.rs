use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use hrsync_common::SweepConfig;
use hrsync_core::ApprovalRequest;

/// Age thresholds for reminders and escalations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub reminder_after: Duration,
    pub escalate_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            reminder_after: Duration::hours(48),
            escalate_after: Duration::hours(72),
        }
    }
}

impl From<&SweepConfig> for SweepPolicy {
    fn from(config: &SweepConfig) -> Self {
        Self {
            reminder_after: Duration::hours(i64::from(config.reminder_after_hours)),
            escalate_after: Duration::hours(i64::from(config.escalate_after_hours)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Escalate,
    Remind,
}

impl SweepPolicy {
    /// Escalation wins over a reminder when both thresholds have passed.
    pub fn action_for(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> Option<SweepAction> {
        let age = now - request.created_at;
        if age >= self.escalate_after && !request.escalated {
            Some(SweepAction::Escalate)
        } else if age >= self.reminder_after && !request.reminder_sent {
            Some(SweepAction::Remind)
        } else {
            None
        }
    }

    pub fn reminder_hours(&self) -> i64 {
        self.reminder_after.num_hours()
    }

    pub fn escalation_hours(&self) -> i64 {
        self.escalate_after.num_hours()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub reminders_sent: usize,
    pub escalations: usize,
    pub errors: usize,
}

/// Allows at most one sweep in flight.
#[derive(Debug, Default)]
pub struct SweepGuard {
    active: AtomicBool,
}

pub struct SweepRun<'a> {
    guard: &'a SweepGuard,
}

impl SweepGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another sweep holds the guard.
    pub fn try_begin(&self) -> Option<SweepRun<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepRun { guard: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for SweepRun<'_> {
    fn drop(&mut self) {
        self.guard.active.store(false, Ordering::Release);
    }
}
