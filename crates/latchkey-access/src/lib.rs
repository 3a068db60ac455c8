//! # latchkey-access: Access request coordination
//!
//! Turns access requests into grants or denials on top of the policy
//! engine in `latchkey-abac`.
//!
//! # Overview
//!
//! - [`AccessRequestCoordinator`] drives each request from `Pending` to a
//!   terminal status
//! - [`GrantLedger`] stores issued grants and their revocations
//! - [`DelegationResolver`] answers whether a subject holds a delegated
//!   permission
//! - [`AuditDispatcher`] delivers audit events off the decision path
//!
//! Device registry, identity and ledger services are consumed through the
//! traits in [`collaborator`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use latchkey_abac::{Effect, Policy};
//! use latchkey_access::{
//!     AccessRequestCoordinator, AccessRequestParams, InMemoryAuditSink,
//!     InMemoryDeviceDirectory, StaticIdentityContext,
//! };
//! use latchkey_types::SubjectId;
//!
//! let devices = Arc::new(InMemoryDeviceDirectory::new());
//! devices.register("door-1", Some(SubjectId::new("alice")));
//!
//! let coordinator = AccessRequestCoordinator::builder(
//!     devices,
//!     Arc::new(StaticIdentityContext::new()),
//!     Arc::new(InMemoryAuditSink::new()),
//! )
//! .build();
//!
//! coordinator
//!     .create_policy(
//!         Policy::new("P1", "door access", Effect::Allow, 100, "facilities", Utc::now())
//!             .with_action("unlock"),
//!     )
//!     .unwrap();
//!
//! let outcome = coordinator
//!     .request_access(AccessRequestParams::new("alice", "door-1", "lockset", "unlock"))
//!     .unwrap();
//! assert!(outcome.is_granted());
//! ```

pub mod anchor;
pub mod audit;
pub mod clock;
pub mod collaborator;
pub mod coordinator;
pub mod delegation;
pub mod error;
pub mod grant;
pub mod request;
pub mod stats;

pub use anchor::content_hash;
pub use audit::{
    AuditDispatcher, AuditError, AuditEvent, AuditKind, AuditSink, DispatchStats, InMemoryAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborator::{
    ANY_ACTION, AnchorKind, AnchorRecord, CollaboratorError, DeviceDirectory, IdentityContext,
    InMemoryDeviceDirectory, InMemoryLedgerAnchor, LedgerAnchor, StaticIdentityContext,
};
pub use coordinator::{AccessRequestCoordinator, CoordinatorBuilder};
pub use delegation::{DelegationChain, DelegationResolver, DelegationTerms};
pub use error::{AccessError, Result};
pub use grant::{AccessGrant, GrantLedger, GrantStatus, GrantTerms};
pub use request::{
    AccessRequest, AccessRequestParams, DEFAULT_VALIDITY_SECS, RequestOutcome, RequestStatus,
};
pub use stats::{AccessStats, StatsSnapshot};
