//! # latchkey-abac: Attribute-Based Access Control
//!
//! Decides whether a subject may perform an action on a device by evaluating
//! every candidate policy against the request's fact set and combining the
//! votes of the policies that match.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Access Request                              │
//! │  (Subject + Resource + Environment facts)    │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  PolicyStore::find_candidates                │
//! │  └─ active policies for resource + action    │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  PolicyEvaluator (per candidate)             │
//! │  ├─ usage limit                              │
//! │  ├─ action, subject conditions               │
//! │  └─ time window, location                    │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  DecisionCombinator                          │
//! │  - highest priority wins                     │
//! │  - Deny wins ties                            │
//! │  - no match: default Deny                    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ```
//! use chrono::Utc;
//! use latchkey_abac::{
//!     AttributeCondition, AttributeStore, DecisionCombinator, Effect, EvaluationRequest, Policy,
//!     PolicyStore,
//! };
//! use latchkey_types::{DeviceId, SubjectId};
//!
//! let store = PolicyStore::new();
//! store
//!     .create(
//!         Policy::new("guards-unlock", "Guards may unlock", Effect::Allow, 100, "admin", Utc::now())
//!             .with_action("unlock")
//!             .with_condition(AttributeCondition::equals("role", "guard")),
//!     )
//!     .unwrap();
//!
//! let subject = SubjectId::new("alice");
//! let device = DeviceId::new("front-door");
//! let facts = AttributeStore::new().with_subject("role", "guard");
//! let request = EvaluationRequest::new(&subject, &device, "unlock", &facts, Utc::now());
//!
//! let mut combinator = DecisionCombinator::new();
//! for candidate in store.find_candidates("lockset", "unlock") {
//!     combinator.record(&candidate.evaluate(&request).unwrap());
//! }
//! assert!(combinator.decide().is_allowed());
//! ```

pub mod attributes;
pub mod combinator;
pub mod condition;
pub mod error;
pub mod evaluator;
pub mod location;
pub mod policy;
pub mod store;
pub mod temporal;


pub use attributes::AttributeStore;
pub use combinator::{CombinedDecision, DecisionCombinator, combine};
pub use condition::{AttributeCondition, ConditionOperator, Outcome};
pub use error::{PolicyError, Result};
pub use evaluator::{EvaluationRequest, PolicyResult, evaluate, evaluate_with_usage};
pub use location::{GeoPoint, LocationConstraint};
pub use policy::{Effect, MAX_PRIORITY, MIN_PRIORITY, Policy, PolicyType, UsageCounters};
pub use store::{PolicyHandle, PolicyStore};
pub use temporal::TimeConstraint;
