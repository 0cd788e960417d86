pub mod approval;
pub mod error;
pub mod plan;
pub mod schema;
pub mod store;
pub mod strategy;
pub mod value;

pub use approval::{
    AUTHORITY_TARGET, ApprovalRequest, Decision, NewApprovalRequest, Notification,
    NotificationKind, RequestPriority, RequestStatus,
};
pub use error::SyncError;
pub use plan::{EventContext, EventName, EventOutcome, UpdatePlan, context_number, context_text};
pub use schema::{OTHER_CATEGORY, SchemaMap};
pub use store::{InMemoryStore, RecordStore};
pub use strategy::{PlanRequest, PlanStrategy, SchemaStrategy};
pub use value::{CellValue, Record, keys_match, normalize_key, values_match};
