//! Error taxonomy shared by every backend.
//!
//! Numerical degeneracy (too few samples, zero variance) is deliberately
//! absent: it surfaces as NaN fields in results, not as an error.

use crate::Backend;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// The catalog has no descriptor for the wire name.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// Required fields missing or shape invariants broken.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Marker compute invoked before any set-context.
    #[error("marker context not set")]
    ContextNotSet,
    /// Requested or attempted backend is not ready.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(Backend),
    /// Request exceeded its deadline. The worker is not interrupted.
    #[error("request timed out")]
    Timeout,
    /// Cancel signal fired before completion.
    #[error("request cancelled")]
    Cancelled,
    /// The executing worker died; pending requests on it receive this.
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
    /// Health monitor forcibly reset the executing worker.
    #[error("worker stuck and restarted")]
    StuckAndRestarted,
    /// Bookkeeping faults that should not occur in a healthy pool
    /// (e.g. a reply for an evicted slot).
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable snake_case kind label used in logs and wire replies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::UnknownOperation(_) => "unknown_operation",
            CoreError::InvalidPayload(_) => "invalid_payload",
            CoreError::ContextNotSet => "context_not_set",
            CoreError::BackendUnavailable(_) => "backend_unavailable",
            CoreError::Timeout => "timeout",
            CoreError::Cancelled => "cancelled",
            CoreError::WorkerCrashed(_) => "worker_crashed",
            CoreError::StuckAndRestarted => "stuck_and_restarted",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Whether the dispatcher may transparently retry this failure on the
    /// next backend in the fallback chain. Caller-visible outcomes
    /// (validation, timeout, cancellation) are surfaced as-is.
    pub fn fallback_eligible(&self) -> bool {
        !matches!(
            self,
            CoreError::UnknownOperation(_)
                | CoreError::InvalidPayload(_)
                | CoreError::ContextNotSet
                | CoreError::Timeout
                | CoreError::Cancelled
        )
    }
}
