use thiserror::Error;

use crate::types::ReportState;

#[derive(Error, Debug)]
pub enum AtlasError {
    /// Illegal state edge. Carries the current state and the legal next
    /// states so callers can present valid alternatives — never auto-corrected.
    #[error("invalid transition from {from} to {to}; legal next states: {allowed:?}")]
    InvalidTransition {
        from: ReportState,
        to: ReportState,
        allowed: Vec<ReportState>,
    },

    /// Guard failure: entering review requires evidence or the
    /// low-confidence flag.
    #[error("report {report_id} has no evidence and is not flagged low-confidence")]
    MissingEvidence { report_id: uuid::Uuid },

    /// Optimistic concurrency failure on a state transition. The caller
    /// must re-read and retry; conflicts are never silently merged.
    #[error("report {report_id} version mismatch: expected {expected}, stored {actual}")]
    ConcurrentModificationConflict {
        report_id: uuid::Uuid,
        expected: u64,
        actual: u64,
    },

    /// Two moderator pins contradict each other. The automatic pass leaves
    /// the affected reports unclustered rather than guessing.
    #[error("cluster pins contradict for reports {a} and {b}")]
    ClusterPinConflict { a: uuid::Uuid, b: uuid::Uuid },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
