//! Access grant ledger.
//!
//! A grant is valid while it is unrevoked and `now <= valid_until`.
//! Revocation is permanent; an expired grant stays invalid even though it
//! was never revoked. Grants are never deleted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use latchkey_types::{DeviceId, GrantId, Principal, RequestId, SubjectId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AccessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantStatus {
    Active,
    Revoked,
    Expired,
}

/// An issued access grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: GrantId,
    pub request_id: RequestId,
    pub grantee: SubjectId,
    pub device_id: DeviceId,
    pub resource: String,
    pub action: String,
    pub granted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Creator of the policy that allowed the request.
    pub granted_by: SubjectId,
    pub conditions_summary: String,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<SubjectId>,
    pub revocation_reason: Option<String>,
}

impl AccessGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Revocation wins over expiry when both apply.
    pub fn status(&self, now: DateTime<Utc>) -> GrantStatus {
        if self.revoked {
            GrantStatus::Revoked
        } else if self.is_expired(now) {
            GrantStatus::Expired
        } else {
            GrantStatus::Active
        }
    }
}

/// The terms of a grant about to be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantTerms {
    pub request_id: RequestId,
    pub grantee: SubjectId,
    pub device_id: DeviceId,
    pub resource: String,
    pub action: String,
    pub granted_by: SubjectId,
    pub conditions_summary: String,
    pub granted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    grants: HashMap<GrantId, AccessGrant>,
    by_grantee: HashMap<SubjectId, Vec<GrantId>>,
}

/// Stores every grant ever issued.
#[derive(Debug, Default)]
pub struct GrantLedger {
    inner: RwLock<LedgerInner>,
}

impl GrantLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues a new grant.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidInput`] if `valid_until` precedes `granted_at`.
    pub fn issue(&self, terms: GrantTerms) -> Result<AccessGrant> {
        if terms.valid_until < terms.granted_at {
            return Err(AccessError::InvalidInput(format!(
                "grant would end at {} before it starts at {}",
                terms.valid_until, terms.granted_at
            )));
        }

        let grant = AccessGrant {
            id: GrantId::generate(),
            request_id: terms.request_id,
            grantee: terms.grantee,
            device_id: terms.device_id,
            resource: terms.resource,
            action: terms.action,
            granted_at: terms.granted_at,
            valid_until: terms.valid_until,
            granted_by: terms.granted_by,
            conditions_summary: terms.conditions_summary,
            revoked: false,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        };

        let mut inner = self.write();
        inner
            .by_grantee
            .entry(grant.grantee.clone())
            .or_default()
            .push(grant.id);
        inner.grants.insert(grant.id, grant.clone());
        Ok(grant)
    }

    pub fn get(&self, id: GrantId) -> Option<AccessGrant> {
        self.read().grants.get(&id).cloned()
    }

    /// False for unknown, revoked or expired grants.
    pub fn is_valid(&self, id: GrantId, now: DateTime<Utc>) -> bool {
        self.read()
            .grants
            .get(&id)
            .is_some_and(|grant| grant.is_valid(now))
    }

    /// # Errors
    ///
    /// Returns [`AccessError::NotFound`] if the grant is unknown.
    pub fn status(&self, id: GrantId, now: DateTime<Utc>) -> Result<GrantStatus> {
        self.read()
            .grants
            .get(&id)
            .map(|grant| grant.status(now))
            .ok_or_else(|| AccessError::not_found("grant", id))
    }

    /// Revokes a grant and returns the revoked record.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the grant is unknown
    /// - [`AccessError::Unauthorized`] unless `actor` is an admin, the grantee or the granter
    /// - [`AccessError::AlreadyRevoked`] if the grant was revoked before
    /// - [`AccessError::Expired`] if the grant is past its validity
    pub fn revoke(
        &self,
        id: GrantId,
        actor: &Principal,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<AccessGrant> {
        let mut inner = self.write();
        let grant = inner
            .grants
            .get_mut(&id)
            .ok_or_else(|| AccessError::not_found("grant", id))?;

        if !actor.is_admin_or(&grant.grantee) && actor.id != grant.granted_by {
            return Err(AccessError::unauthorized(&actor.id, format!("revoke grant {id}")));
        }
        if grant.revoked {
            return Err(AccessError::AlreadyRevoked(id));
        }
        if grant.is_expired(now) {
            return Err(AccessError::Expired(id));
        }

        let reason = reason.into();
        grant.revoked = true;
        grant.revoked_at = Some(now);
        grant.revoked_by = Some(actor.id.clone());
        grant.revocation_reason = Some(reason.clone());

        info!(
            grant = %id,
            grantee = %grant.grantee,
            actor = %actor.id,
            reason = %reason,
            "Grant revoked"
        );
        Ok(grant.clone())
    }

    /// Every grant issued to `grantee`, oldest first.
    pub fn grants_for(&self, grantee: &SubjectId) -> Vec<AccessGrant> {
        let inner = self.read();
        inner
            .by_grantee
            .get(grantee)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.grants.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().grants.is_empty()
    }
}
