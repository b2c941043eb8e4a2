use crate::model::ReviewStatus;
use thiserror::Error;

/// Workflow error taxonomy. Everything except `SendFailure` is returned
/// before any persisted state changes; `SendFailure` reports a best-effort
/// notification that failed after the state change already committed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("actor lacks the role required for this action")]
    Forbidden,
    #[error("action {action} is not valid from status {from:?}")]
    InvalidTransition {
        from: ReviewStatus,
        action: &'static str,
    },
    #[error("resubmission requires a non-empty submission note")]
    MissingRequiredNote,
    #[error("no account exists for {0}")]
    UnknownRecipient(String),
    #[error("invitation token is unknown or expired")]
    InvalidToken,
    #[error("content item not found")]
    NotFound,
    #[error("content was modified concurrently; re-fetch and retry")]
    StaleState,
    #[error("notification send failed: {0}")]
    SendFailure(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
