//! Delegation chains.
//!
//! A chain lets a delegatee perform a set of actions on the delegator's
//! behalf until it expires or is revoked. Resolution is single-hop: a
//! delegatee can pass permissions on only by creating a new explicit chain,
//! and that chain's depth is bounded by the chains it builds on.
//!
//! Chains are never deleted. Expired and revoked chains are excluded from
//! resolution but remain available through [`DelegationResolver::chains_for`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use latchkey_config::{DelegationConfig, MAX_DELEGATION_DEPTH};
use latchkey_types::{DelegationId, Principal, SubjectId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AccessError, Result};

/// A delegation from one subject to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationChain {
    pub id: DelegationId,
    pub delegator: SubjectId,
    pub delegatee: SubjectId,
    /// Actions the delegatee may perform.
    pub permissions: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Deepest re-delegation allowed below and including this chain.
    pub max_depth: u8,
    /// 1 when the delegator holds the permissions directly.
    pub depth: u8,
    pub active: bool,
}

impl DelegationChain {
    /// Active and strictly before `valid_until`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.valid_until
    }

    pub fn covers(&self, action: &str, now: DateTime<Utc>) -> bool {
        self.is_live(now) && self.permissions.contains(action)
    }
}

/// Parameters of a new chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationTerms {
    pub delegator: SubjectId,
    pub delegatee: SubjectId,
    pub permissions: BTreeSet<String>,
    pub validity_secs: u64,
    pub max_depth: u8,
}

impl DelegationTerms {
    pub fn new<I, S>(
        delegator: impl Into<SubjectId>,
        delegatee: impl Into<SubjectId>,
        permissions: I,
        validity_secs: u64,
        max_depth: u8,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            delegator: delegator.into(),
            delegatee: delegatee.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
            validity_secs,
            max_depth,
        }
    }
}

#[derive(Debug, Default)]
struct ResolverInner {
    chains: HashMap<DelegationId, DelegationChain>,
    by_delegatee: HashMap<SubjectId, Vec<DelegationId>>,
    by_delegator: HashMap<SubjectId, Vec<DelegationId>>,
}

impl ResolverInner {
    fn incoming<'a>(&'a self, subject: &SubjectId) -> impl Iterator<Item = &'a DelegationChain> + 'a {
        self.by_delegatee
            .get(subject)
            .into_iter()
            .flatten()
            .filter_map(|id| self.chains.get(id))
    }
}

/// Creates, revokes and resolves delegation chains.
#[derive(Debug)]
pub struct DelegationResolver {
    inner: RwLock<ResolverInner>,
    max_validity_secs: u64,
    max_depth: u8,
}

impl Default for DelegationResolver {
    fn default() -> Self {
        Self::new(&DelegationConfig::default())
    }
}

impl DelegationResolver {
    pub fn new(config: &DelegationConfig) -> Self {
        Self {
            inner: RwLock::new(ResolverInner::default()),
            max_validity_secs: config.max_validity_secs,
            max_depth: config.max_depth.min(MAX_DELEGATION_DEPTH),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ResolverInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResolverInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a chain.
    ///
    /// When the delegator holds any requested permission through live
    /// incoming chains, the new chain sits one level below the deepest of
    /// them and may not exceed the smallest `max_depth` among them.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidInput`] if the delegatee is the delegator,
    /// `max_depth` is outside `1..=5` (or the configured maximum), the
    /// permission set is empty, the validity is zero or above the configured
    /// maximum, or the depth bound of a parent chain would be exceeded.
    pub fn create(&self, terms: DelegationTerms, now: DateTime<Utc>) -> Result<DelegationChain> {
        validate(&terms, self.max_depth, self.max_validity_secs)?;
        let valid_until = i64::try_from(terms.validity_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|validity| now.checked_add_signed(validity))
            .ok_or_else(|| AccessError::InvalidInput("validity overflows".to_string()))?;

        let mut inner = self.write();

        let parents: Vec<&DelegationChain> = inner
            .incoming(&terms.delegator)
            .filter(|chain| chain.is_live(now))
            .filter(|chain| !chain.permissions.is_disjoint(&terms.permissions))
            .collect();
        let depth = parents
            .iter()
            .map(|chain| chain.depth)
            .max()
            .map_or(1, |deepest| deepest.saturating_add(1));
        if let Some(bound) = parents.iter().map(|chain| chain.max_depth).min() {
            if depth > bound {
                return Err(AccessError::InvalidInput(format!(
                    "re-delegation by {} would reach depth {depth}, above the bound of {bound}",
                    terms.delegator
                )));
            }
        }
        if depth > terms.max_depth {
            return Err(AccessError::InvalidInput(format!(
                "chain depth {depth} exceeds its own max depth {}",
                terms.max_depth
            )));
        }

        let chain = DelegationChain {
            id: DelegationId::generate(),
            delegator: terms.delegator,
            delegatee: terms.delegatee,
            permissions: terms.permissions,
            created_at: now,
            valid_until,
            max_depth: terms.max_depth,
            depth,
            active: true,
        };

        inner
            .by_delegatee
            .entry(chain.delegatee.clone())
            .or_default()
            .push(chain.id);
        inner
            .by_delegator
            .entry(chain.delegator.clone())
            .or_default()
            .push(chain.id);
        inner.chains.insert(chain.id, chain.clone());

        info!(
            delegation = %chain.id,
            delegator = %chain.delegator,
            delegatee = %chain.delegatee,
            depth = chain.depth,
            valid_until = %chain.valid_until,
            "Delegation created"
        );
        Ok(chain)
    }

    /// Returns true if a live chain to `subject` covers `action`.
    pub fn resolve(&self, subject: &SubjectId, action: &str, now: DateTime<Utc>) -> bool {
        self.covering(subject, action, now).is_some()
    }

    /// The live chain covering `action` for `subject`, if any.
    pub fn covering(&self, subject: &SubjectId, action: &str, now: DateTime<Utc>) -> Option<DelegationChain> {
        self.read()
            .incoming(subject)
            .find(|chain| chain.covers(action, now))
            .cloned()
    }

    /// Deactivates a chain.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the chain is unknown
    /// - [`AccessError::Unauthorized`] unless `actor` is the delegator or an admin
    /// - [`AccessError::InvalidInput`] if the chain is already inactive
    pub fn revoke(&self, id: DelegationId, actor: &Principal) -> Result<()> {
        let mut inner = self.write();
        let chain = inner
            .chains
            .get_mut(&id)
            .ok_or_else(|| AccessError::not_found("delegation", id))?;

        if !actor.is_admin_or(&chain.delegator) {
            return Err(AccessError::unauthorized(&actor.id, format!("revoke delegation {id}")));
        }
        if !chain.active {
            return Err(AccessError::InvalidInput(format!("delegation {id} is already revoked")));
        }

        chain.active = false;
        info!(delegation = %id, actor = %actor.id, "Delegation revoked");
        Ok(())
    }

    pub fn get(&self, id: DelegationId) -> Option<DelegationChain> {
        self.read().chains.get(&id).cloned()
    }

    /// Every chain granted to or by `subject`, live or not, oldest first.
    pub fn chains_for(&self, subject: &SubjectId) -> Vec<DelegationChain> {
        let inner = self.read();
        let ids: BTreeSet<&DelegationId> = inner
            .by_delegatee
            .get(subject)
            .into_iter()
            .chain(inner.by_delegator.get(subject))
            .flatten()
            .collect();
        let mut chains: Vec<DelegationChain> = ids
            .into_iter()
            .filter_map(|id| inner.chains.get(id).cloned())
            .collect();
        chains.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        chains
    }
}

fn validate(terms: &DelegationTerms, max_depth: u8, max_validity_secs: u64) -> Result<()> {
    if terms.delegator.is_empty() || terms.delegatee.is_empty() {
        return Err(AccessError::InvalidInput("delegator and delegatee are required".to_string()));
    }
    if terms.delegatee == terms.delegator {
        return Err(AccessError::InvalidInput(format!(
            "{} cannot delegate to itself",
            terms.delegator
        )));
    }
    if !(1..=max_depth).contains(&terms.max_depth) {
        return Err(AccessError::InvalidInput(format!(
            "max depth {} is outside 1..={max_depth}",
            terms.max_depth
        )));
    }
    if terms.permissions.is_empty() || terms.permissions.iter().any(|p| p.trim().is_empty()) {
        return Err(AccessError::InvalidInput(
            "permissions must name at least one action".to_string(),
        ));
    }
    if terms.validity_secs == 0 || terms.validity_secs > max_validity_secs {
        return Err(AccessError::InvalidInput(format!(
            "validity of {}s is outside 1..={max_validity_secs}",
            terms.validity_secs
        )));
    }
    Ok(())
}
