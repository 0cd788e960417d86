pub mod lifecycle;
pub mod scheduler;
pub mod sweep;
pub mod target;

pub use lifecycle::{
    ApprovalLifecycle, LifecycleError, creation_context, decision_context, parse_decision,
};
pub use scheduler::SweepScheduler;
pub use sweep::{SweepAction, SweepGuard, SweepPolicy, SweepReport, SweepRun};
pub use target::{EngineSyncTarget, SyncTarget};
