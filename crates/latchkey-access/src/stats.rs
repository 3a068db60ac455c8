//! Request counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct AccessStats {
    total_requests: AtomicU64,
    total_grants: AtomicU64,
    total_denials: AtomicU64,
}

impl AccessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_grant(&self) {
        self.total_grants.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denial(&self) {
        self.total_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_grants = self.total_grants.load(Ordering::Relaxed);
        StatsSnapshot {
            total_requests,
            total_grants,
            total_denials: self.total_denials.load(Ordering::Relaxed),
            success_rate_percent: success_rate(total_grants, total_requests),
        }
    }
}

/// Point-in-time view of [`AccessStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub total_grants: u64,
    pub total_denials: u64,
    /// Granted share of all requests, rounded down; 0 with no requests.
    pub success_rate_percent: u64,
}

fn success_rate(grants: u64, requests: u64) -> u64 {
    if requests == 0 {
        return 0;
    }
    grants.saturating_mul(100) / requests
}
