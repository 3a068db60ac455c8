//! End-to-end request pipeline tests against the in-memory collaborators.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use latchkey_abac::{AttributeCondition, Effect, Policy, PolicyError};
use latchkey_access::{
    AccessError, AccessRequestCoordinator, AccessRequestParams, AnchorKind, AuditKind, Clock,
    DelegationTerms, GrantStatus, InMemoryAuditSink, InMemoryDeviceDirectory, InMemoryLedgerAnchor,
    ManualClock, RequestStatus, StatsSnapshot, StaticIdentityContext,
};
use latchkey_config::LatchkeyConfig;
use latchkey_types::{DeviceId, PolicyId, SubjectId};

struct Fixture {
    coordinator: AccessRequestCoordinator,
    devices: Arc<InMemoryDeviceDirectory>,
    identity: Arc<StaticIdentityContext>,
    audit: Arc<InMemoryAuditSink>,
    anchor: Arc<InMemoryLedgerAnchor>,
    clock: Arc<ManualClock>,
}

/// Wednesday 2025-01-08 10:00 UTC.
fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap()
}

fn fixture() -> Fixture {
    let devices = Arc::new(InMemoryDeviceDirectory::new());
    devices.register("door-1", Some(SubjectId::new("alice")));
    let identity = Arc::new(StaticIdentityContext::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let anchor = Arc::new(InMemoryLedgerAnchor::new());
    let clock = Arc::new(ManualClock::new(start()));

    let mut config = LatchkeyConfig::default();
    config.access.admins = vec!["root".to_string()];

    let coordinator =
        AccessRequestCoordinator::builder(devices.clone(), identity.clone(), audit.clone())
            .with_config(config)
            .with_clock(clock.clone())
            .with_anchor(anchor.clone())
            .build();

    Fixture {
        coordinator,
        devices,
        identity,
        audit,
        anchor,
        clock,
    }
}

fn policy(id: &str, effect: Effect, priority: u32) -> Policy {
    Policy::new(id, format!("{id} door access"), effect, priority, "facilities", start())
        .with_action("unlock")
}

fn unlock(requester: &str) -> AccessRequestParams {
    AccessRequestParams::new(requester, "door-1", "lockset", "unlock").with_validity_secs(3600)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn allow_policy_grants_for_requested_validity() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();

    assert_eq!(outcome.status, RequestStatus::Granted);
    let grant = f.coordinator.get_grant(outcome.grant_id.unwrap()).unwrap();
    assert_eq!(grant.valid_until, start() + Duration::seconds(3600));
    assert_eq!(grant.granted_by, SubjectId::new("facilities"));
    assert_eq!(grant.grantee, SubjectId::new("alice"));
    assert!(f.coordinator.is_grant_valid(grant.id));

    assert_eq!(f.audit.events_of(AuditKind::Request).len(), 1);
    assert_eq!(f.audit.events_of(AuditKind::Grant).len(), 1);
    assert!(f.audit.events_of(AuditKind::Denial).is_empty());
}

#[test]
fn equal_priority_deny_overrides_allow() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    f.coordinator
        .create_policy(policy("P2", Effect::Deny, 100))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();

    assert_eq!(outcome.status, RequestStatus::Denied);
    assert_eq!(outcome.grant_id, None);
    assert!(!outcome.reason.is_empty());
    assert!(f.coordinator.grants().is_empty());
    assert_eq!(f.audit.events_of(AuditKind::Denial).len(), 1);
    assert_eq!(f.audit.events_of(AuditKind::UnauthorizedAttempt).len(), 1);
}

#[test]
fn missing_role_fact_does_not_match() {
    let f = fixture();
    f.coordinator
        .create_policy(
            policy("P1", Effect::Allow, 100).with_condition(AttributeCondition::equals("role", "guard")),
        )
        .unwrap();

    let denied = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(denied.status, RequestStatus::Denied);

    f.identity.set_fact("alice", "role", "guard");
    let granted = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(granted.status, RequestStatus::Granted);
}

#[test]
fn request_attributes_cannot_override_identity_facts() {
    let f = fixture();
    f.coordinator
        .create_policy(
            policy("P1", Effect::Allow, 100).with_condition(AttributeCondition::equals("role", "guard")),
        )
        .unwrap();
    f.identity.set_fact("alice", "role", "visitor");

    let outcome = f
        .coordinator
        .request_access(unlock("alice").with_attribute("role", "guard"))
        .unwrap();

    assert_eq!(outcome.status, RequestStatus::Denied);
}

#[test]
fn no_candidates_is_default_deny() {
    let f = fixture();

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();

    assert_eq!(outcome.status, RequestStatus::Denied);
    assert!(outcome.reason.contains("default deny"));
}

// ============================================================================
// Input and collaborators
// ============================================================================

#[test]
fn invalid_input_records_nothing() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    for params in [
        unlock("alice").with_validity_secs(0),
        unlock("alice").with_validity_secs(86_401),
        AccessRequestParams::new("alice", "door-1", "lockset", ""),
        AccessRequestParams::new("", "door-1", "lockset", "unlock"),
    ] {
        assert!(matches!(
            f.coordinator.request_access(params),
            Err(AccessError::InvalidInput(_))
        ));
    }

    assert_eq!(f.coordinator.get_stats(), StatsSnapshot::default());
    assert_eq!(f.audit.count(), 0);
}

#[test]
fn unregistered_device_is_not_found() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    let result = f
        .coordinator
        .request_access(AccessRequestParams::new("alice", "ghost", "lockset", "unlock"));

    assert!(matches!(result, Err(AccessError::NotFound { kind: "device", .. })));
    assert_eq!(f.coordinator.get_stats().total_requests, 0);
    assert_eq!(f.audit.count(), 0);
}

#[test]
fn inactive_device_is_denied() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    assert!(f.devices.set_active(&DeviceId::new("door-1"), false));

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();

    assert_eq!(outcome.status, RequestStatus::Denied);
    assert!(outcome.reason.contains("inactive"));
}

#[test]
fn collaborator_outages_fail_closed() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    f.devices.set_unavailable(true);
    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Denied);
    assert!(outcome.reason.contains("unavailable"));
    f.devices.set_unavailable(false);

    f.identity.set_unavailable(true);
    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Denied);
    f.identity.set_unavailable(false);

    let stats = f.coordinator.get_stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.total_denials, 2);
    assert!(f.coordinator.grants().is_empty());
}

#[test]
fn policy_allow_still_needs_device_authorization() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("bob")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Denied);

    assert!(f.devices.allow("bob", &DeviceId::new("door-1"), "unlock"));
    let outcome = f.coordinator.request_access(unlock("bob")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Granted);
}

#[test]
fn audit_failure_does_not_change_the_decision() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    f.audit.fail_next(10);

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();

    assert_eq!(outcome.status, RequestStatus::Granted);
    assert_eq!(f.audit.count(), 0);
}

// ============================================================================
// Grants
// ============================================================================

#[test]
fn grant_expires_the_instant_after_valid_until() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    let grant_id = f
        .coordinator
        .request_access(unlock("alice"))
        .unwrap()
        .grant_id
        .unwrap();

    f.clock.advance(Duration::seconds(3600));
    assert!(f.coordinator.is_grant_valid(grant_id));

    f.clock.advance(Duration::nanoseconds(1));
    assert!(!f.coordinator.is_grant_valid(grant_id));
    assert_eq!(
        f.coordinator.grants().status(grant_id, f.clock.now()),
        Ok(GrantStatus::Expired)
    );
    assert_eq!(
        f.coordinator.revoke_access(grant_id, &SubjectId::new("alice"), "late"),
        Err(AccessError::Expired(grant_id))
    );
}

#[test]
fn revocation_is_one_way_and_audited() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    let grant_id = f
        .coordinator
        .request_access(unlock("alice"))
        .unwrap()
        .grant_id
        .unwrap();

    let mallory = SubjectId::new("mallory");
    assert!(matches!(
        f.coordinator.revoke_access(grant_id, &mallory, "spite"),
        Err(AccessError::Unauthorized { .. })
    ));
    let attempts = f.audit.events_of(AuditKind::UnauthorizedAttempt);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].actor, mallory);
    assert!(f.coordinator.is_grant_valid(grant_id));

    let revoked = f
        .coordinator
        .revoke_access(grant_id, &SubjectId::new("alice"), "lost badge")
        .unwrap();
    assert!(revoked.revoked);
    assert!(!f.coordinator.is_grant_valid(grant_id));
    assert_eq!(f.audit.events_of(AuditKind::Revocation).len(), 1);

    assert_eq!(
        f.coordinator.revoke_access(grant_id, &SubjectId::new("root"), "again"),
        Err(AccessError::AlreadyRevoked(grant_id))
    );
}

#[test]
fn configured_admin_may_revoke_any_grant() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    let grant_id = f
        .coordinator
        .request_access(unlock("alice"))
        .unwrap()
        .grant_id
        .unwrap();

    assert!(f
        .coordinator
        .revoke_access(grant_id, &SubjectId::new("root"), "offboarding")
        .is_ok());
}

#[test]
fn terminal_records_are_anchored() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    let granted = f.coordinator.request_access(unlock("alice")).unwrap();
    let kinds: Vec<AnchorKind> = f.anchor.records().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![AnchorKind::Request, AnchorKind::Grant]);
    assert_eq!(f.anchor.records()[0].id, granted.request_id.as_uuid());

    f.coordinator.request_access(unlock("bob")).unwrap();
    assert_eq!(f.anchor.records().len(), 3);
}

#[test]
fn terminal_request_is_kept() {
    let f = fixture();

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();
    let request = f.coordinator.get_request(outcome.request_id).unwrap();

    assert_eq!(request.status, RequestStatus::Denied);
    assert_eq!(request.reason.as_deref(), Some(outcome.reason.as_str()));
}

// ============================================================================
// Policy administration
// ============================================================================

#[test]
fn usage_limit_is_enforced_through_the_coordinator() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100).with_max_usage(2))
        .unwrap();

    let statuses: Vec<RequestStatus> = (0..3)
        .map(|_| f.coordinator.request_access(unlock("alice")).unwrap().status)
        .collect();

    assert_eq!(
        statuses,
        vec![RequestStatus::Granted, RequestStatus::Granted, RequestStatus::Denied]
    );
    assert_eq!(f.coordinator.get_stats().success_rate_percent, 66);
}

#[test]
fn unauthorized_subjects_do_not_consume_usage() {
    let f = fixture();
    let id = f
        .coordinator
        .create_policy(policy("P1", Effect::Allow, 100).with_max_usage(3))
        .unwrap();

    for _ in 0..3 {
        let outcome = f.coordinator.request_access(unlock("mallory")).unwrap();
        assert_eq!(outcome.status, RequestStatus::Denied);
        assert!(outcome.reason.contains("neither authorized"));
    }
    assert_eq!(f.coordinator.policies().get(&id).unwrap().usage.current_usage_count, 0);

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Granted);
    let usage = f.coordinator.policies().get(&id).unwrap().usage;
    assert_eq!(usage.current_usage_count, 1);
    assert_eq!(usage.usage_by(&SubjectId::new("alice")), 1);
    assert_eq!(usage.usage_by(&SubjectId::new("mallory")), 0);
}

#[test]
fn outvoted_matches_give_their_usage_back() {
    let f = fixture();
    let allow = f
        .coordinator
        .create_policy(policy("P1", Effect::Allow, 100).with_max_usage(1))
        .unwrap();
    let deny = f
        .coordinator
        .create_policy(policy("P2", Effect::Deny, 200))
        .unwrap();
    let backup = f
        .coordinator
        .create_policy(policy("P3", Effect::Allow, 50).with_max_usage(1))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Denied);
    for id in [&allow, &deny, &backup] {
        assert_eq!(f.coordinator.policies().get(id).unwrap().usage.current_usage_count, 0);
    }

    f.coordinator
        .set_policy_active(&deny, false, &SubjectId::new("root"))
        .unwrap();
    let outcome = f.coordinator.request_access(unlock("alice")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Granted);
    assert_eq!(f.coordinator.policies().get(&allow).unwrap().usage.current_usage_count, 1);
    assert_eq!(f.coordinator.policies().get(&backup).unwrap().usage.current_usage_count, 0);
}

#[test]
fn request_validity_is_capped_at_a_day_whatever_the_config() {
    let devices = Arc::new(InMemoryDeviceDirectory::new());
    devices.register("door-1", Some(SubjectId::new("alice")));
    let mut config = LatchkeyConfig::default();
    config.access.max_request_validity_secs = 864_000;
    let coordinator = AccessRequestCoordinator::builder(
        devices,
        Arc::new(StaticIdentityContext::new()),
        Arc::new(InMemoryAuditSink::new()),
    )
    .with_config(config)
    .with_clock(Arc::new(ManualClock::new(start())))
    .build();
    coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    assert!(matches!(
        coordinator.request_access(unlock("alice").with_validity_secs(432_000)),
        Err(AccessError::InvalidInput(_))
    ));
    let outcome = coordinator
        .request_access(unlock("alice").with_validity_secs(86_400))
        .unwrap();
    let grant = coordinator.get_grant(outcome.grant_id.unwrap()).unwrap();
    assert_eq!(grant.valid_until, start() + Duration::seconds(86_400));
}

#[test]
fn only_creator_or_admin_administers_policies() {
    let f = fixture();
    let id = f
        .coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    assert!(matches!(
        f.coordinator.set_policy_active(&id, false, &SubjectId::new("mallory")),
        Err(AccessError::Unauthorized { .. })
    ));
    assert!(matches!(
        f.coordinator.set_policy_active(&PolicyId::new("P9"), false, &SubjectId::new("root")),
        Err(AccessError::NotFound { kind: "policy", .. })
    ));
    f.coordinator
        .set_policy_active(&id, false, &SubjectId::new("facilities"))
        .unwrap();
    assert_eq!(
        f.coordinator.request_access(unlock("alice")).unwrap().status,
        RequestStatus::Denied
    );

    f.coordinator
        .set_policy_active(&id, true, &SubjectId::new("root"))
        .unwrap();
    f.coordinator
        .set_policy_usage_limit(&id, 1, &SubjectId::new("root"))
        .unwrap();
    assert!(f.coordinator.request_access(unlock("alice")).unwrap().is_granted());
    assert!(!f.coordinator.request_access(unlock("alice")).unwrap().is_granted());
}

#[test]
fn duplicate_policy_id_is_rejected() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    assert_eq!(
        f.coordinator.create_policy(policy("P1", Effect::Allow, 200)),
        Err(AccessError::Policy(PolicyError::DuplicateId(PolicyId::new("P1"))))
    );
}

// ============================================================================
// Delegation
// ============================================================================

#[test]
fn delegation_stands_in_for_device_authorization() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();
    let chain = f
        .coordinator
        .create_delegation(DelegationTerms::new("alice", "bob", ["unlock"], 3600, 2))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("bob")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Granted);
    assert!(outcome.reason.contains("delegated"));

    assert!(matches!(
        f.coordinator.revoke_delegation(chain, &SubjectId::new("mallory")),
        Err(AccessError::Unauthorized { .. })
    ));
    f.coordinator
        .revoke_delegation(chain, &SubjectId::new("alice"))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("bob")).unwrap();
    assert_eq!(outcome.status, RequestStatus::Denied);
    assert_eq!(f.coordinator.delegations_for(&SubjectId::new("bob")).len(), 1);
}

#[test]
fn delegation_does_not_bypass_policy() {
    let f = fixture();
    f.coordinator
        .create_delegation(DelegationTerms::new("alice", "bob", ["unlock"], 3600, 2))
        .unwrap();

    let outcome = f.coordinator.request_access(unlock("bob")).unwrap();

    assert_eq!(outcome.status, RequestStatus::Denied);
}

#[test]
fn delegation_bounds_are_enforced() {
    let f = fixture();

    for terms in [
        DelegationTerms::new("alice", "bob", ["unlock"], 3600, 0),
        DelegationTerms::new("alice", "bob", ["unlock"], 3600, 6),
        DelegationTerms::new("alice", "alice", ["unlock"], 3600, 1),
    ] {
        assert!(matches!(
            f.coordinator.create_delegation(terms),
            Err(AccessError::InvalidInput(_))
        ));
    }
}

#[test]
fn stats_track_outcomes() {
    let f = fixture();
    f.coordinator
        .create_policy(policy("P1", Effect::Allow, 100))
        .unwrap();

    f.coordinator.request_access(unlock("alice")).unwrap();
    f.coordinator.request_access(unlock("bob")).unwrap();
    f.coordinator.request_access(unlock("alice")).unwrap();
    f.coordinator.request_access(unlock("carol")).unwrap();

    assert_eq!(
        f.coordinator.get_stats(),
        StatsSnapshot {
            total_requests: 4,
            total_grants: 2,
            total_denials: 2,
            success_rate_percent: 50,
        }
    );
}
