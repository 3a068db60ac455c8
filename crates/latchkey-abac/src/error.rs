//! Policy error types.

use latchkey_types::{PolicyId, SubjectId};
use thiserror::Error;

/// Errors raised by policy validation, storage and evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The policy definition violates a structural invariant.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A policy with the same id is already stored.
    #[error("policy already exists: {0}")]
    DuplicateId(PolicyId),

    /// No policy is stored under the id.
    #[error("policy not found: {0}")]
    NotFound(PolicyId),

    /// The actor is neither the policy creator nor an admin.
    #[error("{actor} is not authorized to modify policy {policy}")]
    Unauthorized { actor: SubjectId, policy: PolicyId },

    /// A stored policy could not be evaluated because it is malformed.
    #[error("policy {policy} is malformed: {reason}")]
    EvaluationFailure { policy: PolicyId, reason: String },
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
