/// Closed set of failure kinds every workflow operation reports.
///
/// Callers switch on the variant (or on [`WorkflowError::kind`]); the message
/// text is for humans and logs only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// A referenced task, reward, instance, claim or user does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The caller lacks the relationship or ownership the operation needs.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// The instance is not in a state that permits this transition.
    #[error("{entity} is {current}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        current: String,
        expected: &'static str,
    },

    /// Duplicate active assignment, or a definition that is still in use.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient points: balance {balance}, required {required}")]
    InsufficientPoints { balance: i64, required: i64 },

    /// Invitation code is unknown, expired, or already used.
    #[error("invalid or expired invitation code")]
    InvalidCode,

    #[error("only parent accounts can redeem invitation codes")]
    NotParentRole,

    #[error("already a parent of this child")]
    AlreadyRelated,

    /// Input the engine refuses regardless of state (empty names, zero deltas).
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Storage failure. The unit of work was rolled back.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::Invalid(msg.into())
    }

    /// Stable machine-readable tag for the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::InvalidState { .. } => "invalid_state",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::InsufficientPoints { .. } => "insufficient_points",
            WorkflowError::InvalidCode => "invalid_code",
            WorkflowError::NotParentRole => "not_parent_role",
            WorkflowError::AlreadyRelated => "already_related",
            WorkflowError::Invalid(_) => "invalid",
            WorkflowError::Internal(_) => "internal",
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
