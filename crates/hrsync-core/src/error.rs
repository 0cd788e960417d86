use thiserror::Error;

/// Failure classes of one synchronization run.
///
/// Plan generation failures never leave the planner (it falls back to the deterministic
/// strategy) and verification mismatches are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("write failed: {0}")]
    TransientWrite(String),
    #[error("plan generation failed: {0}")]
    PlanGeneration(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientWrite(_))
    }

    pub fn transient(err: &anyhow::Error) -> Self {
        Self::TransientWrite(format!("{err:#}"))
    }
}
