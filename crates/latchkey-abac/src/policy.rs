//! Policy definitions.
//!
//! A policy names the resource types and actions it covers, the subject
//! conditions that must all hold, optional time and location constraints,
//! and an optional usage budget. When it matches, its [`Effect`] is cast
//! with its priority; the [`combinator`](crate::combinator) resolves the
//! votes of all matching policies.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use latchkey_types::{PolicyId, SubjectId};
use serde::{Deserialize, Serialize};

use crate::condition::AttributeCondition;
use crate::error::{PolicyError, Result};
use crate::location::LocationConstraint;
use crate::temporal::TimeConstraint;

/// Lowest accepted priority.
pub const MIN_PRIORITY: u32 = 1;

/// Highest accepted priority.
pub const MAX_PRIORITY: u32 = 1000;

// ============================================================================
// Effect
// ============================================================================

/// The effect of a matching policy: allow or deny access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Grant access.
    Allow,
    /// Deny access.
    Deny,
}

impl Default for Effect {
    /// Defaults to `Deny` (deny unless explicitly allowed).
    fn default() -> Self {
        Self::Deny
    }
}

// ============================================================================
// PolicyType
// ============================================================================

/// Classification of a policy, carried for reporting.
///
/// Every policy kind is evaluated by the same pipeline; the type does not
/// change which constraints are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PolicyType {
    #[default]
    AttributeBased,
    TimeBased,
    LocationBased,
    Composite,
}

// ============================================================================
// UsageCounters
// ============================================================================

/// The mutable usage state of a policy.
///
/// `max_usage_count == 0` means unlimited. Otherwise
/// `current_usage_count <= max_usage_count` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageCounters {
    pub max_usage_count: u64,
    pub current_usage_count: u64,
    pub per_subject_usage_count: BTreeMap<SubjectId, u64>,
}

impl UsageCounters {
    /// A fresh counter set with the given limit.
    pub fn limited(max_usage_count: u64) -> Self {
        Self {
            max_usage_count,
            ..Self::default()
        }
    }

    /// Returns true if a limit is set and has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.max_usage_count != 0 && self.current_usage_count >= self.max_usage_count
    }

    /// Records one match by `subject`.
    pub fn record(&mut self, subject: &SubjectId) {
        self.current_usage_count = self.current_usage_count.saturating_add(1);
        let per_subject = self
            .per_subject_usage_count
            .entry(subject.clone())
            .or_insert(0);
        *per_subject = per_subject.saturating_add(1);
    }

    /// Takes back one match recorded for `subject`.
    ///
    /// Used when a recorded match did not end in an admission. Does nothing
    /// if `subject` has no recorded match.
    pub fn release(&mut self, subject: &SubjectId) {
        let Some(per_subject) = self.per_subject_usage_count.get_mut(subject) else {
            return;
        };
        *per_subject -= 1;
        if *per_subject == 0 {
            self.per_subject_usage_count.remove(subject);
        }
        self.current_usage_count = self.current_usage_count.saturating_sub(1);
    }

    /// Number of matches recorded for `subject`.
    pub fn usage_by(&self, subject: &SubjectId) -> u64 {
        self.per_subject_usage_count
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    /// Zeroes both counters, keeping the limit.
    pub fn reset(&mut self) {
        self.current_usage_count = 0;
        self.per_subject_usage_count.clear();
    }
}

// ============================================================================
// Policy
// ============================================================================

/// A versioned access policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policy_type: PolicyType,
    pub effect: Effect,
    /// Higher wins. Must lie in `[MIN_PRIORITY, MAX_PRIORITY]`.
    pub priority: u32,
    pub creator: SubjectId,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_version")]
    pub version: u64,
    /// All must hold for the policy to match.
    #[serde(default)]
    pub subject_conditions: Vec<AttributeCondition>,
    /// Empty means every resource type.
    #[serde(default)]
    pub resource_types: BTreeSet<String>,
    /// Empty means every action.
    #[serde(default)]
    pub allowed_actions: BTreeSet<String>,
    #[serde(default)]
    pub time_constraint: Option<TimeConstraint>,
    #[serde(default)]
    pub location_constraint: Option<LocationConstraint>,
    #[serde(flatten)]
    pub usage: UsageCounters,
}

fn default_active() -> bool {
    true
}

fn default_version() -> u64 {
    1
}

impl Policy {
    /// Creates an active, unconstrained policy covering every resource and action.
    pub fn new(
        id: impl Into<PolicyId>,
        name: impl Into<String>,
        effect: Effect,
        priority: u32,
        creator: impl Into<SubjectId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            policy_type: PolicyType::default(),
            effect,
            priority,
            creator: creator.into(),
            created_at,
            active: true,
            version: 1,
            subject_conditions: Vec::new(),
            resource_types: BTreeSet::new(),
            allowed_actions: BTreeSet::new(),
            time_constraint: None,
            location_constraint: None,
            usage: UsageCounters::default(),
        }
    }

    /// Sets the free-text description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the policy type (builder pattern).
    pub fn with_type(mut self, policy_type: PolicyType) -> Self {
        self.policy_type = policy_type;
        self
    }

    /// Adds a subject condition (builder pattern).
    pub fn with_condition(mut self, condition: AttributeCondition) -> Self {
        self.subject_conditions.push(condition);
        self
    }

    /// Restricts the policy to a resource type (builder pattern).
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_types.insert(resource_type.into());
        self
    }

    /// Restricts the policy to an action (builder pattern).
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.allowed_actions.insert(action.into());
        self
    }

    /// Attaches a time constraint (builder pattern).
    pub fn with_time_constraint(mut self, constraint: TimeConstraint) -> Self {
        self.time_constraint = Some(constraint);
        self
    }

    /// Attaches a location constraint (builder pattern).
    pub fn with_location_constraint(mut self, constraint: LocationConstraint) -> Self {
        self.location_constraint = Some(constraint);
        self
    }

    /// Sets the usage limit; 0 means unlimited (builder pattern).
    pub fn with_max_usage(mut self, max_usage_count: u64) -> Self {
        self.usage.max_usage_count = max_usage_count;
        self
    }

    /// Returns true if the policy covers `resource_type`.
    pub fn covers_resource(&self, resource_type: &str) -> bool {
        self.resource_types.is_empty() || self.resource_types.contains(resource_type)
    }

    /// Returns true if the policy covers `action`.
    pub fn covers_action(&self, action: &str) -> bool {
        self.allowed_actions.is_empty() || self.allowed_actions.contains(action)
    }

    /// Checks the rules a policy must satisfy to be stored.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPolicy`] if the id is empty, the priority
    /// is out of range, a `Deny` policy covers every resource and action, a
    /// constraint is malformed, or the usage counter already exceeds the limit.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(PolicyError::InvalidPolicy("policy id is empty".to_string()));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(PolicyError::InvalidPolicy(format!(
                "priority {} of {} is outside {MIN_PRIORITY}..={MAX_PRIORITY}",
                self.priority, self.id
            )));
        }
        if self.effect == Effect::Deny
            && self.resource_types.is_empty()
            && self.allowed_actions.is_empty()
        {
            return Err(PolicyError::InvalidPolicy(format!(
                "deny policy {} must name resource types or actions",
                self.id
            )));
        }
        self.validate_constraints().map_err(PolicyError::InvalidPolicy)?;
        if self.usage.max_usage_count != 0
            && self.usage.current_usage_count > self.usage.max_usage_count
        {
            return Err(PolicyError::InvalidPolicy(format!(
                "usage count {} of {} exceeds limit {}",
                self.usage.current_usage_count, self.id, self.usage.max_usage_count
            )));
        }
        Ok(())
    }

    /// Checks the time and location constraints only.
    pub(crate) fn validate_constraints(&self) -> std::result::Result<(), String> {
        if let Some(time) = &self.time_constraint {
            time.validate()?;
        }
        if let Some(location) = &self.location_constraint {
            location.validate()?;
        }
        Ok(())
    }
}
