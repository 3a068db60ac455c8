//! Audit events and delivery.
//!
//! Every decision step emits an [`AuditEvent`] through an [`AuditSink`].
//! Delivery failures are logged and never change a decision that has
//! already been made.
//!
//! # Architecture
//!
//! ```text
//! coordinator ──append──▶ AuditDispatcher ──ArrayQueue──▶ writer thread ──▶ durable sink
//!                          (never blocks)                  (retries with backoff)
//! ```

use std::sync::atomic::{self, AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_queue::ArrayQueue;
use latchkey_config::{AuditConfig, BackoffConfig};
use latchkey_types::SubjectId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// How long the writer sleeps when the queue is empty before rechecking.
const IDLE_PARK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit queue is full")]
    QueueFull,

    #[error("audit dispatcher is shut down")]
    Closed,
}

// ============================================================================
// AuditEvent
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    Request,
    Grant,
    Denial,
    Revocation,
    UnauthorizedAttempt,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditKind,
    /// Who performed the operation.
    pub actor: SubjectId,
    /// Whose access the event concerns.
    pub subject: SubjectId,
    pub resource: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        kind: AuditKind,
        actor: SubjectId,
        subject: SubjectId,
        resource: impl Into<String>,
        action: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            actor,
            subject,
            resource: resource.into(),
            action: action.into(),
            timestamp,
            details: serde_json::Value::Null,
        }
    }

    /// Attaches structured details (builder pattern).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Durable, per-subject ordered audit storage.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError>;
}

// ============================================================================
// InMemoryAuditSink
// ============================================================================

/// Keeps events in memory. Can be told to fail a number of appends.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failures_remaining: AtomicU32,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` appends fail with [`AuditError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events_of(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }

    pub fn events_for(&self, subject: &SubjectId) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| &event.subject == subject)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AuditError::Unavailable("injected failure".to_string()));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

// ============================================================================
// AuditDispatcher
// ============================================================================

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    retries: AtomicU64,
}

/// Delivery counters of an [`AuditDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
    pub retries: u64,
}

struct Shared {
    queue: ArrayQueue<AuditEvent>,
    closed: AtomicBool,
    counters: DispatchCounters,
}

/// An [`AuditSink`] that hands events to a background writer.
///
/// `append` only enqueues, so decision workers never wait on the durable
/// sink. A full queue drops the event with an error log. The writer retries
/// each failed append with exponential backoff and drops the event once the
/// attempts are exhausted.
pub struct AuditDispatcher {
    shared: Arc<Shared>,
    writer: Thread,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("queued", &self.shared.queue.len())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl AuditDispatcher {
    /// Starts the writer thread.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Unavailable`] if the thread cannot be spawned.
    pub fn start(sink: Arc<dyn AuditSink>, config: &AuditConfig) -> Result<Self, AuditError> {
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(config.queue_capacity.max(1)),
            closed: AtomicBool::new(false),
            counters: DispatchCounters::default(),
        });

        let worker_shared = Arc::clone(&shared);
        let retry = config.retry;
        let handle = thread::Builder::new()
            .name("latchkey-audit".to_string())
            .spawn(move || run_writer(&worker_shared, sink.as_ref(), retry))
            .map_err(|e| AuditError::Unavailable(format!("failed to start audit writer: {e}")))?;

        Ok(Self {
            shared,
            writer: handle.thread().clone(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = &self.shared.counters;
        DispatchStats {
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Events waiting for the writer.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stops accepting events, drains the queue and joins the writer.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.writer.unpark();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Audit writer panicked during shutdown");
            }
        }
    }
}

impl AuditSink for AuditDispatcher {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AuditError::Closed);
        }
        match self.shared.queue.push(event) {
            Ok(()) => {
                // A shutdown that began after the check above may already
                // have drained the queue; take back what would be stranded.
                atomic::fence(Ordering::SeqCst);
                if self.shared.closed.load(Ordering::SeqCst) {
                    if let Some(stranded) = self.shared.queue.pop() {
                        self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        error!(
                            event = %stranded.id,
                            kind = ?stranded.kind,
                            "Audit dispatcher closed during append, event dropped"
                        );
                        return Err(AuditError::Closed);
                    }
                    return Ok(());
                }
                self.writer.unpark();
                Ok(())
            }
            Err(event) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    event = %event.id,
                    kind = ?event.kind,
                    subject = %event.subject,
                    "Audit queue full, event dropped"
                );
                Err(AuditError::QueueFull)
            }
        }
    }
}

impl Drop for AuditDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer(shared: &Shared, sink: &dyn AuditSink, retry: BackoffConfig) {
    loop {
        if let Some(event) = shared.queue.pop() {
            deliver(shared, sink, retry, event);
            continue;
        }
        if shared.closed.load(Ordering::SeqCst) {
            // Appends may race the close flag; take anything that slipped in.
            while let Some(event) = shared.queue.pop() {
                deliver(shared, sink, retry, event);
            }
            break;
        }
        thread::park_timeout(IDLE_PARK);
    }
    debug!("Audit writer stopped");
}

fn deliver(shared: &Shared, sink: &dyn AuditSink, retry: BackoffConfig, event: AuditEvent) {
    let (id, kind) = (event.id, event.kind);
    let mut attempt = 0;
    loop {
        let err = match sink.append(event.clone()) {
            Ok(()) => {
                shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) => err,
        };
        let Some(delay) = retry.delay_for_attempt(attempt) else {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            error!(event = %id, kind = ?kind, attempts = attempt + 1, error = %err, "Audit event dropped");
            return;
        };
        warn!(event = %id, kind = ?kind, attempt, error = %err, "Audit append failed, retrying");
        shared.counters.retries.fetch_add(1, Ordering::Relaxed);
        attempt += 1;
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: AuditKind, subject: &str) -> AuditEvent {
        AuditEvent::new(
            kind,
            SubjectId::new(subject),
            SubjectId::new(subject),
            "lockset",
            "unlock",
            Utc.with_ymd_and_hms(2025, 1, 8, 10, 0, 0).unwrap(),
        )
    }

    fn config(capacity: usize, max_attempts: u32) -> AuditConfig {
        AuditConfig {
            queue_capacity: capacity,
            retry: BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
                max_attempts,
            },
        }
    }

    #[test]
    fn in_memory_sink_filters() {
        let sink = InMemoryAuditSink::new();
        sink.append(event(AuditKind::Request, "alice")).unwrap();
        sink.append(event(AuditKind::Grant, "alice")).unwrap();
        sink.append(event(AuditKind::Request, "bob")).unwrap();

        assert_eq!(sink.count(), 3);
        assert_eq!(sink.events_of(AuditKind::Request).len(), 2);
        assert_eq!(sink.events_for(&SubjectId::new("alice")).len(), 2);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let sink = InMemoryAuditSink::new();
        sink.fail_next(1);
        assert!(sink.append(event(AuditKind::Request, "alice")).is_err());
        assert!(sink.append(event(AuditKind::Request, "alice")).is_ok());
        assert_eq!(sink.count(), 1);
    }

    #[test]
    fn dispatcher_delivers_in_order_and_drains_on_shutdown() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let dispatcher = AuditDispatcher::start(sink.clone(), &config(64, 3)).unwrap();

        for subject in ["a", "b", "c", "d"] {
            dispatcher.append(event(AuditKind::Request, subject)).unwrap();
        }
        dispatcher.shutdown();

        let subjects: Vec<String> = sink.events().iter().map(|e| e.subject.to_string()).collect();
        assert_eq!(subjects, vec!["a", "b", "c", "d"]);
        assert_eq!(dispatcher.stats().delivered, 4);
        assert_eq!(
            dispatcher.append(event(AuditKind::Request, "e")),
            Err(AuditError::Closed)
        );
    }

    #[test]
    fn dispatcher_retries_transient_failures() {
        let sink = Arc::new(InMemoryAuditSink::new());
        sink.fail_next(2);
        let dispatcher = AuditDispatcher::start(sink.clone(), &config(8, 5)).unwrap();

        dispatcher.append(event(AuditKind::Grant, "alice")).unwrap();
        dispatcher.shutdown();

        assert_eq!(sink.count(), 1);
        let stats = dispatcher.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn appends_racing_shutdown_are_never_stranded() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let dispatcher = Arc::new(AuditDispatcher::start(sink.clone(), &config(1024, 1)).unwrap());

        let appenders: Vec<_> = (0..4)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    let subject = format!("worker-{i}");
                    let mut accepted = 0u64;
                    while dispatcher.append(event(AuditKind::Request, &subject)) != Err(AuditError::Closed) {
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(5));
        dispatcher.shutdown();
        let accepted: u64 = appenders.into_iter().map(|h| h.join().unwrap()).sum();

        let stats = dispatcher.stats();
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(sink.count() as u64, stats.delivered);
        assert!(accepted <= stats.delivered + stats.dropped);
    }

    #[test]
    fn dispatcher_drops_after_exhausting_attempts() {
        let sink = Arc::new(InMemoryAuditSink::new());
        sink.fail_next(10);
        let dispatcher = AuditDispatcher::start(sink.clone(), &config(8, 2)).unwrap();

        dispatcher.append(event(AuditKind::Denial, "alice")).unwrap();
        dispatcher.shutdown();

        assert_eq!(sink.count(), 0);
        assert_eq!(dispatcher.stats().dropped, 1);
    }
}
