//! Policy storage and candidate lookup.
//!
//! Definitions are immutable once stored: every mutation swaps in a new
//! `Arc<Policy>` with a bumped version. Usage counters live outside the
//! definition, behind a per-policy `Mutex`, and are shared across versions.
//! Candidate lookup takes the store's read lock only, so any number of
//! requests can gather candidates concurrently while counter updates
//! contend only on the policy they touch.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use latchkey_types::{PolicyId, Principal, SubjectId};
use tracing::info;

use crate::error::{PolicyError, Result};
use crate::evaluator::{self, EvaluationRequest, PolicyResult};
use crate::policy::{Policy, UsageCounters};

// ============================================================================
// PolicyHandle
// ============================================================================

/// A stored policy: its current definition plus its shared usage counters.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    policy: Arc<Policy>,
    usage: Arc<Mutex<UsageCounters>>,
}

impl PolicyHandle {
    fn new(mut policy: Policy) -> Self {
        let usage = std::mem::take(&mut policy.usage);
        Self {
            policy: Arc::new(policy),
            usage: Arc::new(Mutex::new(usage)),
        }
    }

    /// The definition. Its `usage` field is always empty; see [`Self::snapshot`].
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn id(&self) -> &PolicyId {
        &self.policy.id
    }

    /// Evaluates the policy while holding its usage lock, so the limit check
    /// and the increment are one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EvaluationFailure`] if the policy is malformed.
    pub fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<PolicyResult> {
        let mut usage = self.lock_usage();
        evaluator::evaluate_with_usage(&self.policy, &mut usage, request)
    }

    /// Gives back a match recorded by [`Self::evaluate`] for `subject`
    /// that did not end in an admission.
    pub fn release(&self, subject: &SubjectId) {
        self.lock_usage().release(subject);
    }

    /// The definition merged with a copy of the current counters.
    pub fn snapshot(&self) -> Policy {
        let mut policy = (*self.policy).clone();
        policy.usage = self.lock_usage().clone();
        policy
    }

    fn lock_usage(&self) -> MutexGuard<'_, UsageCounters> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new version of the definition sharing the same counters.
    fn revise(&self, change: impl FnOnce(&mut Policy)) -> Self {
        let mut policy = (*self.policy).clone();
        change(&mut policy);
        policy.version = policy.version.saturating_add(1);
        Self {
            policy: Arc::new(policy),
            usage: Arc::clone(&self.usage),
        }
    }
}

// ============================================================================
// PolicyStore
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    policies: HashMap<PolicyId, PolicyHandle>,
    by_resource: HashMap<String, BTreeSet<PolicyId>>,
    by_action: HashMap<String, BTreeSet<PolicyId>>,
    any_resource: BTreeSet<PolicyId>,
    any_action: BTreeSet<PolicyId>,
}

impl StoreInner {
    fn index(&mut self, policy: &Policy) {
        if policy.resource_types.is_empty() {
            self.any_resource.insert(policy.id.clone());
        }
        for resource_type in &policy.resource_types {
            self.by_resource
                .entry(resource_type.clone())
                .or_default()
                .insert(policy.id.clone());
        }
        if policy.allowed_actions.is_empty() {
            self.any_action.insert(policy.id.clone());
        }
        for action in &policy.allowed_actions {
            self.by_action
                .entry(action.clone())
                .or_default()
                .insert(policy.id.clone());
        }
    }

    fn resource_bucket(&self, resource_type: &str) -> BTreeSet<&PolicyId> {
        self.any_resource
            .iter()
            .chain(self.by_resource.get(resource_type).into_iter().flatten())
            .collect()
    }

    fn action_bucket(&self, action: &str) -> BTreeSet<&PolicyId> {
        self.any_action
            .iter()
            .chain(self.by_action.get(action).into_iter().flatten())
            .collect()
    }

    fn handle(&self, id: &PolicyId) -> Result<&PolicyHandle> {
        self.policies
            .get(id)
            .ok_or_else(|| PolicyError::NotFound(id.clone()))
    }
}

/// Holds all policies, indexed by resource type and action.
#[derive(Debug, Default)]
pub struct PolicyStore {
    inner: RwLock<StoreInner>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a new policy.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::InvalidPolicy`] if the policy fails validation
    /// - [`PolicyError::DuplicateId`] if the id is already stored
    pub fn create(&self, policy: Policy) -> Result<PolicyId> {
        policy.validate()?;

        let mut inner = self.write();
        if inner.policies.contains_key(&policy.id) {
            return Err(PolicyError::DuplicateId(policy.id));
        }

        let id = policy.id.clone();
        inner.index(&policy);
        info!(
            policy = %id,
            creator = %policy.creator,
            effect = ?policy.effect,
            priority = policy.priority,
            "Policy created"
        );
        inner.policies.insert(id.clone(), PolicyHandle::new(policy));
        Ok(id)
    }

    /// All active policies covering `resource_type` and `action`, sorted by id.
    pub fn find_candidates(&self, resource_type: &str, action: &str) -> Vec<PolicyHandle> {
        let inner = self.read();
        let by_action = inner.action_bucket(action);
        inner
            .resource_bucket(resource_type)
            .intersection(&by_action)
            .filter_map(|id| inner.policies.get(*id))
            .filter(|handle| handle.policy.active)
            .cloned()
            .collect()
    }

    /// A snapshot of one policy including its counters.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotFound`] if the id is unknown.
    pub fn get(&self, id: &PolicyId) -> Result<Policy> {
        Ok(self.read().handle(id)?.snapshot())
    }

    /// Snapshots of every policy, sorted by id.
    pub fn list(&self) -> Vec<Policy> {
        let inner = self.read();
        let mut policies: Vec<Policy> = inner.policies.values().map(PolicyHandle::snapshot).collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        policies
    }

    pub fn len(&self) -> usize {
        self.read().policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().policies.is_empty()
    }

    /// Activates or deactivates a policy.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NotFound`] if the id is unknown
    /// - [`PolicyError::Unauthorized`] if `actor` is neither creator nor admin
    pub fn set_active(&self, id: &PolicyId, active: bool, actor: &Principal) -> Result<()> {
        let mut inner = self.write();
        let handle = inner.handle(id)?;
        authorize(handle.policy(), actor)?;

        let revised = handle.revise(|policy| policy.active = active);
        info!(
            policy = %id,
            actor = %actor.id,
            active,
            version = revised.policy.version,
            "Policy activation changed"
        );
        inner.policies.insert(id.clone(), revised);
        Ok(())
    }

    /// Changes the usage limit; 0 removes it.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NotFound`] if the id is unknown
    /// - [`PolicyError::Unauthorized`] if `actor` is neither creator nor admin
    /// - [`PolicyError::InvalidPolicy`] if the limit is below the current usage
    pub fn set_usage_limit(&self, id: &PolicyId, max_usage_count: u64, actor: &Principal) -> Result<()> {
        let mut inner = self.write();
        let handle = inner.handle(id)?;
        authorize(handle.policy(), actor)?;

        let revised = {
            let mut usage = handle.lock_usage();
            if max_usage_count != 0 && max_usage_count < usage.current_usage_count {
                return Err(PolicyError::InvalidPolicy(format!(
                    "limit {max_usage_count} is below current usage {} of {id}",
                    usage.current_usage_count
                )));
            }
            usage.max_usage_count = max_usage_count;
            handle.revise(|_| {})
        };
        info!(
            policy = %id,
            actor = %actor.id,
            max_usage_count,
            version = revised.policy.version,
            "Policy usage limit changed"
        );
        inner.policies.insert(id.clone(), revised);
        Ok(())
    }

    /// Zeroes the usage counters of a policy.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NotFound`] if the id is unknown
    /// - [`PolicyError::Unauthorized`] if `actor` is neither creator nor admin
    pub fn reset_usage(&self, id: &PolicyId, actor: &Principal) -> Result<()> {
        let inner = self.read();
        let handle = inner.handle(id)?;
        authorize(handle.policy(), actor)?;

        handle.lock_usage().reset();
        info!(policy = %id, actor = %actor.id, "Policy usage reset");
        Ok(())
    }
}

fn authorize(policy: &Policy, actor: &Principal) -> Result<()> {
    if actor.is_admin_or(&policy.creator) {
        Ok(())
    } else {
        Err(PolicyError::Unauthorized {
            actor: actor.id.clone(),
            policy: policy.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeStore;
    use crate::policy::Effect;
    use chrono::{DateTime, TimeZone, Utc};
    use latchkey_types::{DeviceId, SubjectId};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap()
    }

    fn policy(id: &str) -> Policy {
        Policy::new(id, id, Effect::Allow, 100, "alice", now())
    }

    fn ids(handles: &[PolicyHandle]) -> Vec<&str> {
        handles.iter().map(|h| h.id().as_str()).collect()
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let store = PolicyStore::new();
        store.create(policy("P1")).unwrap();
        assert_eq!(
            store.create(policy("P1")),
            Err(PolicyError::DuplicateId(PolicyId::new("P1")))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalid_policies_are_not_stored() {
        let store = PolicyStore::new();
        let mut bad = policy("P1");
        bad.priority = 0;
        assert!(matches!(store.create(bad), Err(PolicyError::InvalidPolicy(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn candidates_respect_resource_and_action_sets() {
        let store = PolicyStore::new();
        store.create(policy("any")).unwrap();
        store.create(policy("locks").with_resource_type("lockset")).unwrap();
        store.create(policy("cams").with_resource_type("camera")).unwrap();
        store
            .create(policy("unlock").with_resource_type("lockset").with_action("unlock"))
            .unwrap();
        store.create(policy("lock-only").with_action("lock")).unwrap();

        let found = store.find_candidates("lockset", "unlock");
        assert_eq!(ids(&found), vec!["any", "locks", "unlock"]);

        let found = store.find_candidates("camera", "lock");
        assert_eq!(ids(&found), vec!["any", "cams", "lock-only"]);
    }

    #[test]
    fn inactive_policies_are_not_candidates() {
        let store = PolicyStore::new();
        store.create(policy("P1")).unwrap();
        store
            .set_active(&PolicyId::new("P1"), false, &Principal::user("alice"))
            .unwrap();

        assert!(store.find_candidates("lockset", "unlock").is_empty());

        let snapshot = store.get(&PolicyId::new("P1")).unwrap();
        assert!(!snapshot.active);
        assert_eq!(snapshot.version, 2);
    }

    #[test]
    fn mutations_are_creator_or_admin_gated() {
        let store = PolicyStore::new();
        store.create(policy("P1")).unwrap();
        let id = PolicyId::new("P1");

        let err = store.set_active(&id, false, &Principal::user("mallory")).unwrap_err();
        assert!(matches!(err, PolicyError::Unauthorized { .. }));
        assert!(store.set_usage_limit(&id, 5, &Principal::admin("root")).is_ok());
        assert!(matches!(
            store.set_active(&PolicyId::new("nope"), false, &Principal::admin("root")),
            Err(PolicyError::NotFound(_))
        ));
    }

    #[test]
    fn usage_is_shared_across_versions() {
        let store = PolicyStore::new();
        store.create(policy("P1").with_max_usage(2)).unwrap();
        let id = PolicyId::new("P1");
        let facts = AttributeStore::new();
        let subject = SubjectId::new("bob");
        let device = DeviceId::new("door");
        let request = EvaluationRequest::new(&subject, &device, "unlock", &facts, now());

        let stale = store.find_candidates("lockset", "unlock");
        assert!(stale[0].evaluate(&request).unwrap().matched);

        store.set_usage_limit(&id, 3, &Principal::user("alice")).unwrap();
        // The handle taken before the limit change still shares counters
        assert!(stale[0].evaluate(&request).unwrap().matched);

        let snapshot = store.get(&id).unwrap();
        assert_eq!(snapshot.usage.current_usage_count, 2);
        assert_eq!(snapshot.usage.max_usage_count, 3);
        assert_eq!(snapshot.usage.usage_by(&subject), 2);
    }

    #[test]
    fn limit_below_usage_is_rejected() {
        let store = PolicyStore::new();
        store.create(policy("P1").with_max_usage(5)).unwrap();
        let id = PolicyId::new("P1");
        let facts = AttributeStore::new();
        let subject = SubjectId::new("bob");
        let device = DeviceId::new("door");
        let request = EvaluationRequest::new(&subject, &device, "unlock", &facts, now());
        let candidates = store.find_candidates("lockset", "unlock");
        for _ in 0..3 {
            candidates[0].evaluate(&request).unwrap();
        }

        let alice = Principal::user("alice");
        assert!(matches!(
            store.set_usage_limit(&id, 2, &alice),
            Err(PolicyError::InvalidPolicy(_))
        ));
        assert!(store.set_usage_limit(&id, 0, &alice).is_ok());

        store.reset_usage(&id, &alice).unwrap();
        assert_eq!(store.get(&id).unwrap().usage.current_usage_count, 0);
    }

    #[test]
    fn released_usage_reopens_the_limit() {
        let store = PolicyStore::new();
        store.create(policy("P1").with_max_usage(1)).unwrap();
        let facts = AttributeStore::new();
        let subject = SubjectId::new("bob");
        let device = DeviceId::new("door");
        let request = EvaluationRequest::new(&subject, &device, "unlock", &facts, now());
        let candidates = store.find_candidates("lockset", "unlock");

        assert!(candidates[0].evaluate(&request).unwrap().matched);
        assert!(!candidates[0].evaluate(&request).unwrap().matched);

        candidates[0].release(&subject);
        let usage = store.get(&PolicyId::new("P1")).unwrap().usage;
        assert_eq!(usage.current_usage_count, 0);
        assert!(usage.per_subject_usage_count.is_empty());

        // Releasing for a subject with no recorded match is a no-op
        candidates[0].release(&SubjectId::new("mallory"));
        assert!(candidates[0].evaluate(&request).unwrap().matched);
        assert_eq!(store.get(&PolicyId::new("P1")).unwrap().usage.current_usage_count, 1);
    }

    #[test]
    fn list_is_sorted_by_id() {
        let store = PolicyStore::new();
        for id in ["c", "a", "b"] {
            store.create(policy(id)).unwrap();
        }
        let listed: Vec<String> = store.list().into_iter().map(|p| p.id.to_string()).collect();
        assert_eq!(listed, vec!["a", "b", "c"]);
    }
}
