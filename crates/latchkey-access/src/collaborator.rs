//! External collaborators.
//!
//! The device registry, identity provider and ledger are owned by other
//! systems. The coordinator consumes them through these traits; timeouts
//! and retries against the real services are the implementor's concern.
//! Any failure surfaces as [`CollaboratorError`] and never results in an
//! Allow.
//!
//! The in-memory implementations back the tests and the CLI dry run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use latchkey_types::{ContentHash, DeviceId, SubjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Permission that covers every action on a device.
pub const ANY_ACTION: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{service} is unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    #[error("{service} timed out")]
    Timeout { service: &'static str },
}

// ============================================================================
// Traits
// ============================================================================

/// The device and ownership registry.
pub trait DeviceDirectory: Send + Sync {
    fn is_registered(&self, device: &DeviceId) -> Result<bool, CollaboratorError>;

    fn is_active(&self, device: &DeviceId) -> Result<bool, CollaboratorError>;

    /// Whether `subject` owns the device or has been given `action` on it.
    fn has_permission(
        &self,
        subject: &SubjectId,
        device: &DeviceId,
        action: &str,
    ) -> Result<bool, CollaboratorError>;
}

/// Supplies the facts known about a subject (role, department, clearance).
///
/// A subject without facts yields an empty map; absent facts are unknown.
pub trait IdentityContext: Send + Sync {
    fn subject_facts(&self, subject: &SubjectId) -> Result<BTreeMap<String, String>, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorKind {
    Request,
    Grant,
}

/// A digest of a terminal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub kind: AnchorKind,
    pub id: Uuid,
    pub hash: ContentHash,
}

/// The tamper-evident ledger. Submission is fire-and-forget.
pub trait LedgerAnchor: Send + Sync {
    fn anchor(&self, record: AnchorRecord) -> Result<(), CollaboratorError>;
}

// ============================================================================
// InMemoryDeviceDirectory
// ============================================================================

#[derive(Debug, Clone, Default)]
struct DeviceEntry {
    active: bool,
    owner: Option<SubjectId>,
    permissions: HashSet<(SubjectId, String)>,
}

/// A device registry held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDeviceDirectory {
    devices: RwLock<HashMap<DeviceId, DeviceEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an active device, optionally owned by `owner`.
    pub fn register(&self, device: impl Into<DeviceId>, owner: Option<SubjectId>) {
        let entry = DeviceEntry {
            active: true,
            owner,
            permissions: HashSet::new(),
        };
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.into(), entry);
    }

    /// Returns false if the device is not registered.
    pub fn set_active(&self, device: &DeviceId, active: bool) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices
            .get_mut(device)
            .map(|entry| entry.active = active)
            .is_some()
    }

    /// Allows `subject` to perform `action` (or [`ANY_ACTION`]) on `device`.
    /// Returns false if the device is not registered.
    pub fn allow(&self, subject: impl Into<SubjectId>, device: &DeviceId, action: impl Into<String>) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        devices
            .get_mut(device)
            .map(|entry| entry.permissions.insert((subject.into(), action.into())))
            .is_some()
    }

    /// Simulates an outage: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lookup<T>(&self, device: &DeviceId, f: impl FnOnce(Option<&DeviceEntry>) -> T) -> Result<T, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                service: "device directory",
                reason: "simulated outage".to_string(),
            });
        }
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(devices.get(device)))
    }
}

impl DeviceDirectory for InMemoryDeviceDirectory {
    fn is_registered(&self, device: &DeviceId) -> Result<bool, CollaboratorError> {
        self.lookup(device, |entry| entry.is_some())
    }

    fn is_active(&self, device: &DeviceId) -> Result<bool, CollaboratorError> {
        self.lookup(device, |entry| entry.is_some_and(|e| e.active))
    }

    fn has_permission(
        &self,
        subject: &SubjectId,
        device: &DeviceId,
        action: &str,
    ) -> Result<bool, CollaboratorError> {
        self.lookup(device, |entry| {
            entry.is_some_and(|e| {
                e.owner.as_ref() == Some(subject)
                    || e.permissions.contains(&(subject.clone(), action.to_string()))
                    || e.permissions.contains(&(subject.clone(), ANY_ACTION.to_string()))
            })
        })
    }
}

// ============================================================================
// StaticIdentityContext
// ============================================================================

/// Subject facts held in memory.
#[derive(Debug, Default)]
pub struct StaticIdentityContext {
    facts: RwLock<HashMap<SubjectId, BTreeMap<String, String>>>,
    unavailable: AtomicBool,
}

impl StaticIdentityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one fact for a subject.
    pub fn set_fact(&self, subject: impl Into<SubjectId>, name: impl Into<String>, value: impl Into<String>) {
        self.facts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(subject.into())
            .or_default()
            .insert(name.into(), value.into());
    }

    /// Simulates an outage: every call fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl IdentityContext for StaticIdentityContext {
    fn subject_facts(&self, subject: &SubjectId) -> Result<BTreeMap<String, String>, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                service: "identity context",
                reason: "simulated outage".to_string(),
            });
        }
        let facts = self.facts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(facts.get(subject).cloned().unwrap_or_default())
    }
}

// ============================================================================
// InMemoryLedgerAnchor
// ============================================================================

/// Collects anchored digests in submission order.
#[derive(Debug, Default)]
pub struct InMemoryLedgerAnchor {
    records: Mutex<Vec<AnchorRecord>>,
}

impl InMemoryLedgerAnchor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AnchorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LedgerAnchor for InMemoryLedgerAnchor {
    fn anchor(&self, record: AnchorRecord) -> Result<(), CollaboratorError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}
