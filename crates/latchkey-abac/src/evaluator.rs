//! Single-policy evaluation.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. usage limit
//! 2. action membership
//! 3. every subject condition
//! 4. time constraint
//! 5. location constraint
//!
//! On a full match the usage counters are incremented. A failed attempt
//! never consumes usage.

use chrono::{DateTime, Utc};
use latchkey_types::{DeviceId, PolicyId, SubjectId};
use tracing::debug;

use crate::attributes::AttributeStore;
use crate::error::{PolicyError, Result};
use crate::policy::{Effect, Policy, UsageCounters};

// ============================================================================
// Request
// ============================================================================

/// Inputs for evaluating one policy.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub subject: &'a SubjectId,
    pub resource_id: &'a DeviceId,
    pub action: &'a str,
    pub facts: &'a AttributeStore,
    pub now: DateTime<Utc>,
    /// The requester's current location, usually `facts.location()`.
    pub location: Option<&'a str>,
}

impl<'a> EvaluationRequest<'a> {
    /// Builds a request whose location is taken from the fact set.
    pub fn new(
        subject: &'a SubjectId,
        resource_id: &'a DeviceId,
        action: &'a str,
        facts: &'a AttributeStore,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subject,
            resource_id,
            action,
            facts,
            now,
            location: facts.location(),
        }
    }
}

// ============================================================================
// PolicyResult
// ============================================================================

/// The outcome of evaluating one policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    pub policy_id: PolicyId,
    pub effect: Effect,
    pub priority: u32,
    /// Every check passed.
    pub matched: bool,
    /// `matched && effect == Allow`.
    pub allowed: bool,
    pub reason: String,
}

impl PolicyResult {
    fn no_match(policy: &Policy, reason: String) -> Self {
        Self {
            policy_id: policy.id.clone(),
            effect: policy.effect,
            priority: policy.priority,
            matched: false,
            allowed: false,
            reason,
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Evaluates `policy` and records usage in the policy's own counters.
///
/// # Errors
///
/// Returns [`PolicyError::EvaluationFailure`] if a constraint is malformed.
pub fn evaluate(policy: &mut Policy, request: &EvaluationRequest<'_>) -> Result<PolicyResult> {
    let mut usage = std::mem::take(&mut policy.usage);
    let result = evaluate_with_usage(policy, &mut usage, request);
    policy.usage = usage;
    result
}

/// Evaluates `policy` against `request`, reading and updating `usage`.
///
/// The limit is read from `usage`, not from `policy.usage`, so a stored
/// policy can keep its counters behind a separate lock. Callers that need
/// the check and the increment to be atomic must hold that lock for the
/// whole call.
///
/// # Errors
///
/// Returns [`PolicyError::EvaluationFailure`] if a constraint is malformed.
pub fn evaluate_with_usage(
    policy: &Policy,
    usage: &mut UsageCounters,
    request: &EvaluationRequest<'_>,
) -> Result<PolicyResult> {
    policy
        .validate_constraints()
        .map_err(|reason| PolicyError::EvaluationFailure {
            policy: policy.id.clone(),
            reason,
        })?;

    if usage.is_exhausted() {
        return Ok(PolicyResult::no_match(
            policy,
            format!("usage limit of {} reached", usage.max_usage_count),
        ));
    }

    if !policy.covers_action(request.action) {
        return Ok(PolicyResult::no_match(
            policy,
            format!("action '{}' is not covered", request.action),
        ));
    }

    for condition in &policy.subject_conditions {
        let outcome = condition.evaluate(request.facts);
        if !outcome.matched {
            return Ok(PolicyResult::no_match(policy, outcome.reason));
        }
    }

    if let Some(time) = &policy.time_constraint {
        let outcome = time.evaluate(request.now);
        if !outcome.matched {
            return Ok(PolicyResult::no_match(policy, outcome.reason));
        }
    }

    if let Some(location) = &policy.location_constraint {
        let outcome = location.evaluate(request.location);
        if !outcome.matched {
            return Ok(PolicyResult::no_match(policy, outcome.reason));
        }
    }

    usage.record(request.subject);

    debug!(
        policy = %policy.id,
        subject = %request.subject,
        device = %request.resource_id,
        action = request.action,
        effect = ?policy.effect,
        usage = usage.current_usage_count,
        "Policy matched"
    );

    Ok(PolicyResult {
        policy_id: policy.id.clone(),
        effect: policy.effect,
        priority: policy.priority,
        matched: true,
        allowed: policy.effect == Effect::Allow,
        reason: format!(
            "matched policy '{}' ({:?}, priority {})",
            policy.id, policy.effect, policy.priority
        ),
    })
}
