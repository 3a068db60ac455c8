//! Access error types.

use latchkey_abac::PolicyError;
use latchkey_types::{GrantId, SubjectId};
use thiserror::Error;

use crate::collaborator::CollaboratorError;

/// Errors returned by the access coordination layer.
///
/// `InvalidInput`, `NotFound` and `Unauthorized` are returned before any
/// state is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{actor} is not authorized to {operation}")]
    Unauthorized { actor: SubjectId, operation: String },

    /// The grant is past its validity window. Distinct from revocation.
    #[error("grant {0} has expired")]
    Expired(GrantId),

    #[error("grant {0} is already revoked")]
    AlreadyRevoked(GrantId),

    /// A stored policy is malformed and could not be evaluated.
    #[error("policy evaluation failed: {0}")]
    PolicyEvaluationFailure(String),

    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(#[from] CollaboratorError),

    /// Policy failures with no top-level counterpart; authorization and
    /// lookup failures are lifted into `Unauthorized` and `NotFound`.
    #[error(transparent)]
    Policy(PolicyError),
}

impl From<PolicyError> for AccessError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Unauthorized { actor, policy } => Self::Unauthorized {
                actor,
                operation: format!("modify policy {policy}"),
            },
            PolicyError::NotFound(id) => Self::not_found("policy", id),
            PolicyError::EvaluationFailure { .. } => Self::PolicyEvaluationFailure(err.to_string()),
            other => Self::Policy(other),
        }
    }
}

impl AccessError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn unauthorized(actor: &SubjectId, operation: impl Into<String>) -> Self {
        Self::Unauthorized {
            actor: actor.clone(),
            operation: operation.into(),
        }
    }
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
