pub mod analyzer;
pub mod cache;
pub mod engine;
pub mod executor;
pub mod fallback;
pub mod planner;
pub mod verify;

pub use analyzer::{SchemaAnalyzer, analyze_headers};
pub use cache::{ResolvedSchema, SchemaCache};
pub use engine::{SyncEngine, SyncOutcome, SyncRequest};
pub use executor::{ExecutionResult, execute};
pub use fallback::fallback_plan;
pub use planner::{PlanSource, PlannedUpdate, Planner, parse_plan};
pub use verify::{
    DEFAULT_MAX_RETRIES, FieldMismatch, NextAction, RetryController, SyncPhase,
    VerificationReport, verify,
};
