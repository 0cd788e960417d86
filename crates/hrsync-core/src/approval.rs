use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Notification target standing for "whoever holds the assigned authority role".
pub const AUTHORITY_TARGET: &str = "__authority__";
pub const DEFAULT_AUTHORITY_ROLE: &str = "manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Escalated requests are still waiting on a decision.
    pub fn accepts_decision(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" | "critical" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(Self::Approve),
            "reject" | "rejected" | "deny" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Submission payload for a new approval request.
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub company_id: String,
    pub employee_id: String,
    pub employee_name: Option<String>,
    pub request_type: String,
    pub details: Map<String, Value>,
    pub context_message: Option<String>,
    pub priority: RequestPriority,
    pub assigned_role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub id: String,
    pub company_id: String,
    pub employee_id: String,
    pub employee_name: Option<String>,
    pub request_type: String,
    pub details: Map<String, Value>,
    pub context_message: Option<String>,
    pub priority: RequestPriority,
    pub status: RequestStatus,
    pub assigned_role: String,
    pub decided_by: Option<String>,
    pub decision_note: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
    pub escalated: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(input: NewApprovalRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            company_id: input.company_id,
            employee_id: input.employee_id.trim().to_string(),
            employee_name: input.employee_name,
            request_type: input.request_type.trim().to_string(),
            details: input.details,
            context_message: input.context_message,
            priority: input.priority,
            status: RequestStatus::Pending,
            assigned_role: input
                .assigned_role
                .unwrap_or_else(|| DEFAULT_AUTHORITY_ROLE.to_string()),
            decided_by: None,
            decision_note: None,
            decided_at: None,
            reminder_sent: false,
            escalated: false,
            created_at,
        }
    }

    pub fn display_name(&self) -> &str {
        self.employee_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.employee_id)
    }

    /// `leave_request` becomes `Leave Request`.
    pub fn type_title(&self) -> String {
        self.request_type
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn applied_event(&self) -> String {
        format!("{}_applied", self.request_type)
    }

    pub fn decision_event(&self) -> String {
        format!("{}_{}", self.request_type, self.status.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    ApprovalRequest,
    DecisionUpdate,
    Reminder,
    Escalation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequest => "approval_request",
            Self::DecisionUpdate => "decision_update",
            Self::Reminder => "reminder",
            Self::Escalation => "escalation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approval_request" => Some(Self::ApprovalRequest),
            "decision_update" => Some(Self::DecisionUpdate),
            "reminder" => Some(Self::Reminder),
            "escalation" => Some(Self::Escalation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub company_id: String,
    pub target: String,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related_request_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        company_id: impl Into<String>,
        target: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            company_id: company_id.into(),
            target: target.into(),
            title: title.into(),
            message: message.into(),
            kind,
            related_request_id: None,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    pub fn for_request(mut self, request_id: impl Into<String>) -> Self {
        self.related_request_id = Some(request_id.into());
        self
    }
}
