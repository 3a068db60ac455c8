//! Access request coordination.
//!
//! The coordinator runs each request through the decision pipeline and
//! records the result:
//!
//! ```text
//! params ─▶ validate ─▶ device registered? ─▶ Pending ─▶ device active?
//!                                                           │
//!                     owner/authorized ∨ delegated ◀────────┘
//!                              │
//!        facts (identity ▸ resource ▸ request attributes)
//!                              │
//!        candidates ─▶ evaluate each ─▶ combine ─▶ release unused usage
//!                                                      │
//!                  Granted (grant issued) | Denied ◀───┘
//! ```
//!
//! Only the policy whose Allow admits the request keeps the usage its
//! match recorded.
//!
//! Audit emission and anchoring happen after the decision. Their failure is
//! logged and never changes the outcome.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use latchkey_abac::attributes::{DEVICE_ID_FACT, RESOURCE_TYPE_FACT};
use latchkey_abac::{
    AttributeStore, EvaluationRequest, Policy, PolicyHandle, PolicyResult, PolicyStore, combine,
};
use latchkey_config::{LatchkeyConfig, MAX_REQUEST_VALIDITY_SECS};
use latchkey_types::{DelegationId, GrantId, PolicyId, Principal, RequestId, SubjectId};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::anchor::{grant_record, request_record};
use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::clock::{Clock, SystemClock};
use crate::collaborator::{AnchorRecord, CollaboratorError, DeviceDirectory, IdentityContext, LedgerAnchor};
use crate::delegation::{DelegationChain, DelegationResolver, DelegationTerms};
use crate::error::{AccessError, Result};
use crate::grant::{AccessGrant, GrantLedger, GrantTerms};
use crate::request::{AccessRequest, AccessRequestParams, RequestOutcome};
use crate::stats::{AccessStats, StatsSnapshot};

// ============================================================================
// Verdict
// ============================================================================

/// The pipeline's decision before it is recorded.
#[derive(Debug)]
enum Verdict {
    Allow {
        deciding_policy: PolicyId,
        granted_by: SubjectId,
        reason: String,
    },
    Deny {
        reason: String,
        /// A collaborator failed; logged apart from policy denials.
        outage: bool,
    },
}

impl Verdict {
    fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
            outage: false,
        }
    }

    fn outage(err: CollaboratorError) -> Self {
        Self::Deny {
            reason: AccessError::from(err).to_string(),
            outage: true,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles an [`AccessRequestCoordinator`].
pub struct CoordinatorBuilder {
    devices: Arc<dyn DeviceDirectory>,
    identity: Arc<dyn IdentityContext>,
    audit: Arc<dyn AuditSink>,
    anchor: Option<Arc<dyn LedgerAnchor>>,
    clock: Arc<dyn Clock>,
    config: LatchkeyConfig,
    policies: Option<Arc<PolicyStore>>,
    grants: Option<Arc<GrantLedger>>,
}

impl CoordinatorBuilder {
    pub fn with_config(mut self, config: LatchkeyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_anchor(mut self, anchor: Arc<dyn LedgerAnchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Shares an existing policy store instead of starting empty.
    pub fn with_policy_store(mut self, policies: Arc<PolicyStore>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Shares an existing grant ledger instead of starting empty.
    pub fn with_grant_ledger(mut self, grants: Arc<GrantLedger>) -> Self {
        self.grants = Some(grants);
        self
    }

    pub fn build(self) -> AccessRequestCoordinator {
        let access = &self.config.access;
        AccessRequestCoordinator {
            policies: self.policies.unwrap_or_default(),
            grants: self.grants.unwrap_or_default(),
            delegations: DelegationResolver::new(&self.config.delegation),
            devices: self.devices,
            identity: self.identity,
            audit: self.audit,
            anchor: self.anchor,
            clock: self.clock,
            admins: access.admins.iter().map(SubjectId::new).collect(),
            max_request_validity_secs: access
                .max_request_validity_secs
                .min(MAX_REQUEST_VALIDITY_SECS),
            requests: RwLock::new(HashMap::new()),
            stats: AccessStats::new(),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Decides access requests and administers policies, grants and delegations.
///
/// Shared between workers behind an `Arc`; every method takes `&self`.
pub struct AccessRequestCoordinator {
    policies: Arc<PolicyStore>,
    grants: Arc<GrantLedger>,
    delegations: DelegationResolver,
    devices: Arc<dyn DeviceDirectory>,
    identity: Arc<dyn IdentityContext>,
    audit: Arc<dyn AuditSink>,
    anchor: Option<Arc<dyn LedgerAnchor>>,
    clock: Arc<dyn Clock>,
    admins: HashSet<SubjectId>,
    max_request_validity_secs: u64,
    requests: RwLock<HashMap<RequestId, AccessRequest>>,
    stats: AccessStats,
}

impl std::fmt::Debug for AccessRequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRequestCoordinator")
            .field("policies", &self.policies.len())
            .field("grants", &self.grants.len())
            .field("admins", &self.admins)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl AccessRequestCoordinator {
    pub fn builder(
        devices: Arc<dyn DeviceDirectory>,
        identity: Arc<dyn IdentityContext>,
        audit: Arc<dyn AuditSink>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            devices,
            identity,
            audit,
            anchor: None,
            clock: Arc::new(SystemClock),
            config: LatchkeyConfig::default(),
            policies: None,
            grants: None,
        }
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn grants(&self) -> &GrantLedger {
        &self.grants
    }

    pub fn delegations(&self) -> &DelegationResolver {
        &self.delegations
    }

    /// The actor as seen by precondition checks; configured admins get
    /// the admin role.
    pub fn principal(&self, subject: &SubjectId) -> Principal {
        if self.admins.contains(subject) {
            Principal::admin(subject.clone())
        } else {
            Principal::user(subject.clone())
        }
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Decides a request and returns its terminal outcome.
    ///
    /// # Errors
    ///
    /// - [`AccessError::InvalidInput`] for empty fields or validity outside
    ///   `(0, max_request_validity_secs]`
    /// - [`AccessError::NotFound`] if the device is not registered
    ///
    /// Neither error records a request. Every other failure, including an
    /// unavailable collaborator, yields a `Denied` outcome.
    pub fn request_access(&self, params: AccessRequestParams) -> Result<RequestOutcome> {
        params.validate(self.max_request_validity_secs)?;

        let registered = self.devices.is_registered(&params.device_id);
        if matches!(registered, Ok(false)) {
            return Err(AccessError::not_found("device", &params.device_id));
        }

        let now = self.clock.now();
        let mut request = AccessRequest::pending(params, now);
        self.stats.record_request();
        self.store_request(&request);
        self.emit(
            self.event(AuditKind::Request, &request.requester, &request, now)
                .with_details(json!({
                    "request_id": request.id,
                    "device_id": request.device_id,
                    "expires_at": request.expires_at,
                })),
        );

        let verdict = match registered {
            Err(err) => Verdict::outage(err),
            Ok(_) => self.decide(&request, now),
        };

        match verdict {
            Verdict::Allow {
                deciding_policy,
                granted_by,
                reason,
            } => self.record_grant(request, deciding_policy, granted_by, reason, now),
            Verdict::Deny { reason, outage } => {
                request.deny(reason)?;
                self.record_denial(&request, outage, now);
                Ok(request.outcome())
            }
        }
    }

    fn decide(&self, request: &AccessRequest, now: DateTime<Utc>) -> Verdict {
        match self.devices.is_active(&request.device_id) {
            Ok(true) => {}
            Ok(false) => return Verdict::deny(format!("device {} is inactive", request.device_id)),
            Err(err) => return Verdict::outage(err),
        }

        // Checked before evaluation so that unauthorized subjects never
        // touch a policy's usage counters.
        let basis = match self.authorization_basis(request, now) {
            Ok(basis) => basis,
            Err(verdict) => return verdict,
        };

        let subject_facts = match self.identity.subject_facts(&request.requester) {
            Ok(facts) => facts,
            Err(err) => return Verdict::outage(err),
        };
        let mut facts = AttributeStore::new()
            .with_resource(RESOURCE_TYPE_FACT, request.resource.as_str())
            .with_resource(DEVICE_ID_FACT, request.device_id.as_str());
        facts.extend_subject(subject_facts);
        facts.extend_environment(request.attributes.iter());

        let candidates = self
            .policies
            .find_candidates(&request.resource, &request.action);
        let evaluation = EvaluationRequest::new(
            &request.requester,
            &request.device_id,
            &request.action,
            &facts,
            now,
        );

        let mut results = Vec::with_capacity(candidates.len());
        for handle in &candidates {
            match handle.evaluate(&evaluation) {
                Ok(result) => results.push(result),
                Err(err) => {
                    error!(
                        request = %request.id,
                        policy = %handle.id(),
                        error = %err,
                        "Stored policy could not be evaluated; denying"
                    );
                    release_usage(&candidates, &results, None, &request.requester);
                    let failure = AccessError::PolicyEvaluationFailure(err.to_string());
                    return Verdict::deny(failure.to_string());
                }
            }
        }

        let decision = combine(&results);
        debug!(
            request = %request.id,
            candidates = candidates.len(),
            effect = ?decision.effect,
            deciding_policy = ?decision.deciding_policy,
            "Policies combined"
        );
        let deciding = decision
            .deciding_policy
            .as_ref()
            .filter(|_| decision.is_allowed())
            .and_then(|id| creator_of(&candidates, id));
        release_usage(
            &candidates,
            &results,
            deciding.as_ref().map(|(id, _)| id),
            &request.requester,
        );

        if !decision.is_allowed() {
            return Verdict::deny(decision.reason);
        }
        let Some((deciding_policy, granted_by)) = deciding else {
            return Verdict::deny("allow decision has no deciding policy");
        };

        Verdict::Allow {
            deciding_policy,
            granted_by,
            reason: format!("{}; {basis}", decision.reason),
        }
    }

    /// Why the requester may act on the device at all: a direct permission
    /// or a covering delegation.
    fn authorization_basis(
        &self,
        request: &AccessRequest,
        now: DateTime<Utc>,
    ) -> std::result::Result<String, Verdict> {
        let authorized = self
            .devices
            .has_permission(&request.requester, &request.device_id, &request.action)
            .map_err(Verdict::outage)?;
        if authorized {
            return Ok("subject is authorized for the device".to_string());
        }
        match self
            .delegations
            .covering(&request.requester, &request.action, now)
        {
            Some(chain) => Ok(format!("delegated by {} via chain {}", chain.delegator, chain.id)),
            None => Err(Verdict::deny(format!(
                "{} is neither authorized for device {} nor delegated '{}'",
                request.requester, request.device_id, request.action
            ))),
        }
    }

    fn record_grant(
        &self,
        mut request: AccessRequest,
        deciding_policy: PolicyId,
        granted_by: SubjectId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<RequestOutcome> {
        let grant = self.grants.issue(GrantTerms {
            request_id: request.id,
            grantee: request.requester.clone(),
            device_id: request.device_id.clone(),
            resource: request.resource.clone(),
            action: request.action.clone(),
            granted_by,
            conditions_summary: format!("policy {deciding_policy}"),
            granted_at: now,
            valid_until: request.expires_at,
        })?;
        request.grant(grant.id, reason)?;
        self.stats.record_grant();
        self.store_request(&request);

        info!(
            request = %request.id,
            grant = %grant.id,
            subject = %request.requester,
            device = %request.device_id,
            action = %request.action,
            policy = %deciding_policy,
            valid_until = %grant.valid_until,
            "Access granted"
        );
        self.emit(
            self.event(AuditKind::Grant, &grant.granted_by, &request, now)
                .with_details(json!({
                    "request_id": request.id,
                    "grant_id": grant.id,
                    "policy_id": deciding_policy,
                    "valid_until": grant.valid_until,
                })),
        );
        self.submit_anchor(request_record(&request));
        self.submit_anchor(grant_record(&grant));

        Ok(request.outcome())
    }

    fn record_denial(&self, request: &AccessRequest, outage: bool, now: DateTime<Utc>) {
        self.stats.record_denial();
        self.store_request(request);

        let reason = request.reason.clone().unwrap_or_default();
        if outage {
            error!(
                request = %request.id,
                subject = %request.requester,
                device = %request.device_id,
                reason = %reason,
                "Access denied: collaborator unavailable"
            );
        } else {
            warn!(
                request = %request.id,
                subject = %request.requester,
                device = %request.device_id,
                action = %request.action,
                reason = %reason,
                "Access denied"
            );
        }

        let details = json!({
            "request_id": request.id,
            "reason": reason,
            "collaborator_unavailable": outage,
        });
        self.emit(
            self.event(AuditKind::Denial, &request.requester, request, now)
                .with_details(details.clone()),
        );
        self.emit(
            self.event(AuditKind::UnauthorizedAttempt, &request.requester, request, now)
                .with_details(details),
        );
        self.submit_anchor(request_record(request));
    }

    pub fn get_request(&self, id: RequestId) -> Option<AccessRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn store_request(&self, request: &AccessRequest) {
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.id, request.clone());
    }

    // ------------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------------

    /// Revokes a grant on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// See [`GrantLedger::revoke`]. A rejected attempt by an unauthorized
    /// actor is audited.
    pub fn revoke_access(
        &self,
        grant_id: GrantId,
        actor: &SubjectId,
        reason: impl Into<String>,
    ) -> Result<AccessGrant> {
        let now = self.clock.now();
        let reason = reason.into();
        let principal = self.principal(actor);

        match self.grants.revoke(grant_id, &principal, reason.as_str(), now) {
            Ok(grant) => {
                self.emit(
                    AuditEvent::new(
                        AuditKind::Revocation,
                        actor.clone(),
                        grant.grantee.clone(),
                        grant.resource.as_str(),
                        grant.action.as_str(),
                        now,
                    )
                    .with_details(json!({ "grant_id": grant.id, "reason": reason })),
                );
                self.submit_anchor(grant_record(&grant));
                Ok(grant)
            }
            Err(err @ AccessError::Unauthorized { .. }) => {
                warn!(grant = %grant_id, actor = %actor, "Unauthorized revocation attempt");
                if let Some(grant) = self.grants.get(grant_id) {
                    self.emit(
                        AuditEvent::new(
                            AuditKind::UnauthorizedAttempt,
                            actor.clone(),
                            grant.grantee,
                            grant.resource,
                            grant.action,
                            now,
                        )
                        .with_details(json!({ "grant_id": grant_id, "operation": "revoke" })),
                    );
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn get_grant(&self, id: GrantId) -> Option<AccessGrant> {
        self.grants.get(id)
    }

    /// False for unknown, revoked or expired grants.
    pub fn is_grant_valid(&self, id: GrantId) -> bool {
        self.grants.is_valid(id, self.clock.now())
    }

    // ------------------------------------------------------------------------
    // Policy administration
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`AccessError::Policy`] if the policy is invalid or its id is taken.
    pub fn create_policy(&self, policy: Policy) -> Result<PolicyId> {
        Ok(self.policies.create(policy)?)
    }

    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the policy is unknown
    /// - [`AccessError::Unauthorized`] if `actor` is neither its creator nor an admin
    pub fn set_policy_active(&self, id: &PolicyId, active: bool, actor: &SubjectId) -> Result<()> {
        Ok(self.policies.set_active(id, active, &self.principal(actor))?)
    }

    /// # Errors
    ///
    /// As [`Self::set_policy_active`], and [`AccessError::Policy`] for a
    /// limit below current usage.
    pub fn set_policy_usage_limit(&self, id: &PolicyId, max_usage_count: u64, actor: &SubjectId) -> Result<()> {
        Ok(self
            .policies
            .set_usage_limit(id, max_usage_count, &self.principal(actor))?)
    }

    // ------------------------------------------------------------------------
    // Delegation
    // ------------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`AccessError::InvalidInput`] for terms outside the configured bounds.
    pub fn create_delegation(&self, terms: DelegationTerms) -> Result<DelegationId> {
        let chain = self.delegations.create(terms, self.clock.now())?;
        Ok(chain.id)
    }

    /// # Errors
    ///
    /// See [`DelegationResolver::revoke`].
    pub fn revoke_delegation(&self, id: DelegationId, actor: &SubjectId) -> Result<()> {
        self.delegations.revoke(id, &self.principal(actor))
    }

    pub fn delegations_for(&self, subject: &SubjectId) -> Vec<DelegationChain> {
        self.delegations.chains_for(subject)
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------------
    // Side effects
    // ------------------------------------------------------------------------

    fn event(
        &self,
        kind: AuditKind,
        actor: &SubjectId,
        request: &AccessRequest,
        now: DateTime<Utc>,
    ) -> AuditEvent {
        AuditEvent::new(
            kind,
            actor.clone(),
            request.requester.clone(),
            request.resource.as_str(),
            request.action.as_str(),
            now,
        )
    }

    fn emit(&self, event: AuditEvent) {
        let (id, kind) = (event.id, event.kind);
        if let Err(err) = self.audit.append(event) {
            error!(event = %id, kind = ?kind, error = %err, "Audit event not recorded");
        }
    }

    fn submit_anchor(&self, record: std::result::Result<AnchorRecord, postcard::Error>) {
        let Some(anchor) = &self.anchor else {
            return;
        };
        match record {
            Ok(record) => {
                if let Err(err) = anchor.anchor(record) {
                    warn!(id = %record.id, kind = ?record.kind, error = %err, "Ledger anchor rejected record");
                }
            }
            Err(err) => error!(error = %err, "Record could not be encoded for anchoring"),
        }
    }
}

/// Gives back the usage recorded by every matched candidate except `keep`,
/// the policy whose Allow admitted the request.
fn release_usage(
    candidates: &[PolicyHandle],
    results: &[PolicyResult],
    keep: Option<&PolicyId>,
    subject: &SubjectId,
) {
    for (handle, result) in candidates.iter().zip(results) {
        if result.matched && Some(handle.id()) != keep {
            handle.release(subject);
        }
    }
}

fn creator_of(candidates: &[PolicyHandle], id: &PolicyId) -> Option<(PolicyId, SubjectId)> {
    candidates
        .iter()
        .find(|handle| handle.id() == id)
        .map(|handle| (id.clone(), handle.policy().creator.clone()))
}
