//! Per-request fact sets for ABAC evaluation.
//!
//! Three fact categories drive access decisions:
//! - **Subject facts**: role, department, clearance, supplied by the identity context
//! - **Resource facts**: resource type and device id of the target
//! - **Environment facts**: request-supplied context such as the current location
//!
//! Lookups search subject, then resource, then environment facts, so a
//! requester-supplied environment fact can never shadow an identity fact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Environment fact holding the requester's current location.
pub const LOCATION_FACT: &str = "location";

/// Resource fact holding the requested resource type.
pub const RESOURCE_TYPE_FACT: &str = "resource_type";

/// Resource fact holding the target device id.
pub const DEVICE_ID_FACT: &str = "device_id";

/// The fact set of a single access request.
///
/// Built fresh for every request and discarded afterwards; it holds no
/// persistent state. Missing facts are unknown, and every evaluator treats
/// an unknown fact as a non-match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeStore {
    subject: BTreeMap<String, String>,
    resource: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subject fact (builder pattern).
    pub fn with_subject(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.subject.insert(name.into(), value.into());
        self
    }

    /// Adds a resource fact (builder pattern).
    pub fn with_resource(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource.insert(name.into(), value.into());
        self
    }

    /// Adds an environment fact (builder pattern).
    pub fn with_environment(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Merges subject facts, replacing existing values with the same name.
    pub fn extend_subject<I, K, V>(&mut self, facts: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.subject
            .extend(facts.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Merges environment facts, replacing existing values with the same name.
    pub fn extend_environment<I, K, V>(&mut self, facts: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(facts.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Looks up a fact by name across all categories.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.subject
            .get(name)
            .or_else(|| self.resource.get(name))
            .or_else(|| self.environment.get(name))
            .map(String::as_str)
    }

    pub fn subject(&self, name: &str) -> Option<&str> {
        self.subject.get(name).map(String::as_str)
    }

    pub fn resource(&self, name: &str) -> Option<&str> {
        self.resource.get(name).map(String::as_str)
    }

    pub fn environment(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }

    /// The requester's current location, if the request carried one.
    pub fn location(&self) -> Option<&str> {
        self.environment(LOCATION_FACT)
    }

    pub fn is_empty(&self) -> bool {
        self.subject.is_empty() && self.resource.is_empty() && self.environment.is_empty()
    }
}
