use crate::types::Status;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid date '{0}'. Expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Invalid time '{0}'. Expected an ISO datetime such as 2025-09-26T15:09:52")]
    InvalidTime(String),
    #[error("A rejection reason is required")]
    MissingReason,
    #[error("Field verification needs a role between 1 and 4")]
    MissingVerificationRole,
    #[error("Only the requester or their delegate may submit request {0}")]
    NotRequester(String),
    #[error("Request {0} is not completed or is already linked to an event")]
    RequestNotLinkable(String),
    #[error("No completed requests are available for a signing event")]
    NoLinkableRequests,
    #[error("Malformed request number '{0}'. Expected NNNNN/KL-PL/[P|C]/MM/YY")]
    InvalidSequenceNumber(String),
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("Not authorized at step level {level}. Required department(s): {required:?}")]
    AuthorizationDenied { level: u32, required: Vec<String> },
    #[error("{0} is not currently in a workflow step")]
    NotInWorkflow(String),
    #[error("Cannot {action} while the entity is {status:?}")]
    InvalidTransition { action: &'static str, status: Status },
    #[error("Directory unavailable and no local fallback applies: {0}")]
    DirectoryUnavailable(String),
    #[error("Unable to issue a request number ({0}). Cancel and resubmit the request")]
    NumberingConflict(String),
    #[error("Step moved from level {expected} to {actual:?} while the action was in flight")]
    StaleStep { expected: u32, actual: Option<u32> },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Codec(String),
}

impl WorkflowError {
    /// Errors where repeating the whole action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::NumberingConflict(_) | WorkflowError::StaleStep { .. }
        )
    }
}
