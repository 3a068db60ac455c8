//! Access request lifecycle.
//!
//! A request is created `Pending` and moves exactly once to `Granted` or
//! `Denied`. Terminal requests are immutable history.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use latchkey_types::{DeviceId, GrantId, RequestId, SubjectId};
use serde::{Deserialize, Serialize};

use crate::error::{AccessError, Result};

/// Validity used when a request does not ask for a specific duration.
pub const DEFAULT_VALIDITY_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Granted,
    Denied,
}

/// What a requester asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequestParams {
    pub requester: SubjectId,
    pub device_id: DeviceId,
    /// Resource type of the target, e.g. "lockset".
    pub resource: String,
    pub action: String,
    /// Environment facts supplied with the request.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub validity_secs: u64,
}

impl AccessRequestParams {
    pub fn new(
        requester: impl Into<SubjectId>,
        device_id: impl Into<DeviceId>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            requester: requester.into(),
            device_id: device_id.into(),
            resource: resource.into(),
            action: action.into(),
            attributes: BTreeMap::new(),
            validity_secs: DEFAULT_VALIDITY_SECS,
        }
    }

    /// Adds an environment fact (builder pattern).
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Sets the requested validity in seconds (builder pattern).
    pub fn with_validity_secs(mut self, validity_secs: u64) -> Self {
        self.validity_secs = validity_secs;
        self
    }

    /// Rejects empty fields and validity outside `(0, max_validity_secs]`.
    pub fn validate(&self, max_validity_secs: u64) -> Result<()> {
        let fields = [
            ("requester", self.requester.as_str()),
            ("device id", self.device_id.as_str()),
            ("resource", self.resource.as_str()),
            ("action", self.action.as_str()),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(AccessError::InvalidInput(format!("{name} is empty")));
        }
        if self.validity_secs == 0 || self.validity_secs > max_validity_secs {
            return Err(AccessError::InvalidInput(format!(
                "validity of {}s is outside 1..={max_validity_secs}",
                self.validity_secs
            )));
        }
        Ok(())
    }
}

/// A request as recorded by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: RequestId,
    pub requester: SubjectId,
    pub device_id: DeviceId,
    pub resource: String,
    pub action: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    pub status: RequestStatus,
    /// Set together with the terminal status.
    pub reason: Option<String>,
    pub grant_id: Option<GrantId>,
}

impl AccessRequest {
    /// Records a pending request. `params` must already be validated.
    pub fn pending(params: AccessRequestParams, requested_at: DateTime<Utc>) -> Self {
        let expires_at = i64::try_from(params.validity_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|validity| requested_at.checked_add_signed(validity))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: RequestId::generate(),
            requester: params.requester,
            device_id: params.device_id,
            resource: params.resource,
            action: params.action,
            requested_at,
            expires_at,
            attributes: params.attributes,
            status: RequestStatus::Pending,
            reason: None,
            grant_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RequestStatus::Pending
    }

    /// Moves to `Granted`.
    pub fn grant(&mut self, grant_id: GrantId, reason: impl Into<String>) -> Result<()> {
        self.resolve(RequestStatus::Granted, reason.into())?;
        self.grant_id = Some(grant_id);
        Ok(())
    }

    /// Moves to `Denied`.
    pub fn deny(&mut self, reason: impl Into<String>) -> Result<()> {
        self.resolve(RequestStatus::Denied, reason.into())
    }

    fn resolve(&mut self, status: RequestStatus, reason: String) -> Result<()> {
        if self.is_terminal() {
            return Err(AccessError::InvalidInput(format!(
                "request {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.reason = Some(reason);
        Ok(())
    }

    pub fn outcome(&self) -> RequestOutcome {
        RequestOutcome {
            request_id: self.id,
            status: self.status,
            reason: self.reason.clone().unwrap_or_default(),
            grant_id: self.grant_id,
            expires_at: self.expires_at,
        }
    }
}

/// The terminal result handed back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub reason: String,
    pub grant_id: Option<GrantId>,
    pub expires_at: DateTime<Utc>,
}

impl RequestOutcome {
    pub fn is_granted(&self) -> bool {
        self.status == RequestStatus::Granted
    }
}
