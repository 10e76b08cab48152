//! Error taxonomy for leave workflow operations
use crate::chain::ChainRole;
use crate::leave::LeaveStatus;

pub type LeaveResult<T> = Result<T, LeaveError>;

#[derive(thiserror::Error, Debug)]
pub enum LeaveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Leave request {0} was not found")]
    NotFound(String),
    #[error("Leave request {id} is already {status}")]
    AlreadyTerminal { id: String, status: LeaveStatus },
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("Leave request {0} was modified concurrently")]
    PersistenceConflict(String),
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode or decode a stored record: {0}")]
    Codec(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum ValidationError {
    #[error("End date must not be before start date")]
    InvalidDateRange,
    #[error("Reason must be at least {min} characters")]
    ReasonTooShort { min: usize },
    #[error("A custom leave type needs a label")]
    EmptyCustomLabel,
    #[error("Invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Unknown leave type: {0}")]
    UnknownLeaveType(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("A comment is required when rejecting")]
    MissingRejectComment,
    #[error("A rejection reason is required")]
    EmptyRejectionReason,
    #[error("Attached document is empty")]
    EmptyDocument,
    #[error("The approval chain must contain at least one role")]
    EmptyChain,
    #[error("Role {0} appears more than once in the approval chain")]
    DuplicateRole(ChainRole),
    #[error("Unknown approval role: {0}")]
    UnknownRole(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone)]
pub enum TransitionError {
    #[error("It is {expected}'s turn to act, not {got}'s")]
    OutOfTurn { expected: ChainRole, got: ChainRole },
    #[error("The {0} stage has already been decided")]
    StageResolved(ChainRole),
    #[error("{0} is not part of this approval chain")]
    RoleNotInChain(ChainRole),
    #[error("Actor {actor} does not hold the {role} role")]
    RoleNotHeld { actor: String, role: ChainRole },
    #[error("Employees cannot approve their own leave")]
    SelfApproval,
    #[error("Only the requesting employee may change this leave request")]
    NotOwner,
    #[error("Leave request can no longer be amended")]
    AmendLocked,
}

impl ValidationError {
    /// Name of the input field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::InvalidDateRange => "end_date",
            ValidationError::InvalidDate(_) => "date",
            ValidationError::ReasonTooShort { .. } => "reason",
            ValidationError::EmptyCustomLabel | ValidationError::UnknownLeaveType(_) => {
                "leave_type"
            }
            ValidationError::MissingField(field) => field,
            ValidationError::MissingRejectComment => "comment",
            ValidationError::EmptyRejectionReason => "rejection_reason",
            ValidationError::EmptyDocument => "document",
            ValidationError::EmptyChain
            | ValidationError::DuplicateRole(_)
            | ValidationError::UnknownRole(_) => "approval_chain",
        }
    }
}

impl LeaveError {
    /// A single sentence suitable for showing to the person who made the call.
    pub fn user_message(&self) -> String {
        match self {
            LeaveError::Validation(e) => e.to_string(),
            LeaveError::NotFound(_) => "Leave request not found".to_string(),
            LeaveError::AlreadyTerminal { .. } => {
                "This request has already been decided".to_string()
            }
            LeaveError::InvalidTransition(e) => e.to_string(),
            LeaveError::PersistenceConflict(_) => {
                "This request was updated by someone else, please reload and try again".to_string()
            }
            LeaveError::Storage(_) | LeaveError::Codec(_) | LeaveError::Config(_) => {
                "Internal Server Error".to_string()
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LeaveError::PersistenceConflict(_))
    }
}

pub(crate) fn codec<E: std::fmt::Display>(err: E) -> LeaveError {
    LeaveError::Codec(err.to_string())
}
