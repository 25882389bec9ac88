//! Resolution Workflow
//!
//! Escalated events go onto a bounded queue drained by a fixed pool of
//! async workers on a dedicated runtime. Each worker polls the resolver
//! until it decides or the deadline passes (then OBJECT), writes the
//! Resolution, runs the actuator on AFFIRM and writes a Handshake when
//! the budget allows.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::logic::chain::{ChainStore, RecordKind};
use crate::logic::config::{QueuePolicy, ResolutionConfig};
use crate::logic::error::{GuardError, GuardResult};
use crate::logic::events::{EventBus, GuardEvent};
use crate::logic::telemetry::GuardCounters;
use crate::logic::threat::Event;
use super::actuator::Actuator;
use super::budget::TokenBucket;
use super::resolver::Resolver;
use super::types::{Decision, Handshake, Resolution, Ruling};

/// Resolver tag on resolutions written because the queue was full
pub const QUEUE_FULL_SOURCE: &str = "queue_full";

const BACKLOG_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Retries for a blocked record once shutdown has begun, or on ingress
const BOUNDED_RETRIES: u32 = 20;
/// Warn on the first full-backlog retry and then every N
const BACKLOG_WARN_EVERY: u32 = 50;
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Outcome of `submit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Queue full in drop mode; a rejecting resolution was written
    Dropped,
}

/// How long a record waits on a full chain backlog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BacklogWait {
    /// Until the disk returns (bounded once shutdown begins)
    Hold,
    /// `BOUNDED_RETRIES` attempts; used on the ingress thread
    Bounded,
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct WorkflowShared {
    chain: Arc<ChainStore>,
    resolver: Arc<dyn Resolver>,
    actuator: Arc<dyn Actuator>,
    budget: TokenBucket,
    events: Arc<EventBus>,
    counters: Arc<GuardCounters>,
    timeout: Duration,
    poll_interval: Duration,
    /// Queued or in flight
    pending: AtomicUsize,
    /// Set once shutdown starts; bounds the backlog retries
    stopping: AtomicBool,
}

impl WorkflowShared {
    async fn handle(self: Arc<Self>, event: Event) {
        let started = Instant::now();
        let event = Arc::new(event);
        let (ruling, timed_out) = self.poll_until_decided(event.clone(), started).await;
        let waited_ms = started.elapsed().as_millis() as u64;

        let resolution = Resolution::new(&event, ruling, self.resolver.source_tag(), timed_out, waited_ms);

        // Chain writes and actuator calls block; keep them off the async workers
        let shared = self.clone();
        let result = tokio::task::spawn_blocking(move || shared.record(&event, resolution, BacklogWait::Hold)).await;
        if let Err(e) = result {
            log::error!("Resolution recording task failed: {}", e);
        }

        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Poll immediately, then every `poll_interval`, until a final
    /// decision or the deadline. `(ruling, timed_out)`.
    async fn poll_until_decided(&self, event: Arc<Event>, started: Instant) -> (Ruling, bool) {
        let deadline = started + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            if let Some(ruling) = self.poll_once(event.clone(), remaining).await {
                return (ruling, false);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }

        (Ruling::new(Decision::Object), true)
    }

    /// `None` = still pending (including errors, panics and slow polls)
    async fn poll_once(&self, event: Arc<Event>, remaining: Duration) -> Option<Ruling> {
        let resolver = self.resolver.clone();
        let task = tokio::task::spawn_blocking(move || resolver.resolve(&event));

        match tokio::time::timeout(remaining, task).await {
            Ok(Ok(Ok(ruling))) if ruling.decision.is_final() => Some(ruling),
            Ok(Ok(Ok(_))) => None,
            Ok(Ok(Err(e))) => {
                log::warn!("Resolver {} failed, treating as pending: {}", self.resolver.source_tag(), e);
                None
            }
            Ok(Err(e)) => {
                log::error!("Resolver {} panicked, treating as pending: {}", self.resolver.source_tag(), e);
                None
            }
            Err(_) => {
                log::warn!("Resolver {} poll ran past the deadline", self.resolver.source_tag());
                None
            }
        }
    }

    /// Resolution -> actuator (AFFIRM only) -> handshake (budget permitting)
    fn record(&self, event: &Event, mut resolution: Resolution, wait: BacklogWait) {
        match self.append_with_retry(RecordKind::Resolution, &resolution, wait) {
            Ok(link) => {
                resolution.digest = Some(link.digest);
                resolution.prev = link.prev;
            }
            Err(e) => {
                self.counters.record_chain_error();
                self.counters.record_lost();
                log::error!(
                    "[{}] resolution {} for event {} could not be chained: {}",
                    event.short_id(),
                    resolution.decision,
                    event.id,
                    e
                );
                return;
            }
        }

        self.counters.record_resolution();
        if resolution.timed_out {
            self.counters.record_timeout();
        }
        self.events.emit(GuardEvent::ResolutionRecorded {
            resolution_id: resolution.id.clone(),
            event_id: event.id.clone(),
            decision: resolution.decision,
            resolver: resolution.resolver.clone(),
            timed_out: resolution.timed_out,
        });

        if resolution.decision == Decision::Affirm {
            if let Err(e) = self.actuator.on_affirm(event, &resolution) {
                self.counters.record_actuator_failure();
                log::error!("[{}] actuator {} failed: {:#}", event.short_id(), self.actuator.name(), e);
            }
        }

        if !self.budget.try_take(Instant::now()) {
            self.counters.record_handshake_skipped();
            self.events.emit(GuardEvent::HandshakeSkipped { resolution_id: resolution.id.clone() });
            return;
        }

        let handshake = Handshake::summarize(event, &resolution);
        match self.append_with_retry(RecordKind::Handshake, &handshake, wait) {
            Ok(_) => {
                self.counters.record_handshake();
                self.events.emit(GuardEvent::HandshakeRecorded {
                    handshake_id: handshake.id.clone(),
                    resolution_id: resolution.id.clone(),
                });
            }
            Err(e) => {
                self.counters.record_chain_error();
                self.counters.record_lost();
                log::error!("[{}] handshake could not be chained: {}", event.short_id(), e);
            }
        }
    }

    /// A full backlog blocks the worker until the disk comes back. Once
    /// shutdown has begun (or for `Bounded`) the wait is capped and the
    /// record may be lost.
    fn append_with_retry<P: serde::Serialize>(
        &self,
        kind: RecordKind,
        payload: &P,
        wait: BacklogWait,
    ) -> GuardResult<crate::logic::chain::ChainLink> {
        let mut attempts: u32 = 0;
        let mut grace: u32 = 0;
        loop {
            match self.chain.append(kind, payload) {
                Err(GuardError::BacklogFull(n)) => {
                    if wait == BacklogWait::Bounded || self.stopping.load(Ordering::SeqCst) {
                        if grace >= BOUNDED_RETRIES {
                            return Err(GuardError::BacklogFull(n));
                        }
                        grace += 1;
                    }
                    if attempts % BACKLOG_WARN_EVERY == 0 {
                        log::warn!("Chain backlog full ({} waiting), holding {} record", n, kind);
                    }
                    attempts = attempts.wrapping_add(1);
                    std::thread::sleep(BACKLOG_RETRY_DELAY);
                }
                other => return other,
            }
        }
    }
}

// ============================================================================
// WORKFLOW
// ============================================================================

pub struct ResolutionWorkflow {
    shared: Arc<WorkflowShared>,
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    runtime: Mutex<Option<Runtime>>,
    policy: QueuePolicy,
    workers: usize,
}

impl ResolutionWorkflow {
    /// Build the runtime and start `config.workers` workers
    pub fn start(
        config: &ResolutionConfig,
        chain: Arc<ChainStore>,
        resolver: Arc<dyn Resolver>,
        actuator: Arc<dyn Actuator>,
        events: Arc<EventBus>,
        counters: Arc<GuardCounters>,
    ) -> GuardResult<Self> {
        if config.workers == 0 || config.queue_depth == 0 {
            return Err(GuardError::config("resolution workers and queue depth must be positive"));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.workers)
            .thread_name("guard-resolver")
            .enable_all()
            .build()
            .map_err(|e| GuardError::Runtime(format!("failed to build resolver runtime: {}", e)))?;

        let shared = Arc::new(WorkflowShared {
            chain,
            resolver,
            actuator,
            budget: TokenBucket::new(config.handshake_capacity, config.handshake_refill),
            events,
            counters,
            timeout: config.timeout,
            poll_interval: config.poll_interval,
            pending: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel::<Event>(config.queue_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..config.workers {
            let rx = rx.clone();
            let shared = shared.clone();
            runtime.spawn(async move {
                log::debug!("Resolver worker {} started", worker_id);
                loop {
                    let next = { rx.lock().await.recv().await };
                    match next {
                        Some(event) => shared.clone().handle(event).await,
                        None => break,
                    }
                }
                log::debug!("Resolver worker {} stopped", worker_id);
            });
        }

        log::info!(
            "Resolution workflow started: {} worker(s), queue {}, timeout {:?}, resolver {}",
            config.workers,
            config.queue_depth,
            config.timeout,
            shared.resolver.source_tag()
        );

        Ok(Self {
            shared,
            sender: Mutex::new(Some(tx)),
            runtime: Mutex::new(Some(runtime)),
            policy: config.queue_policy,
            workers: config.workers,
        })
    }

    /// Enqueue an escalated event. Blocks when the queue is full under
    /// `QueuePolicy::Block`.
    pub fn submit(&self, event: Event) -> GuardResult<Submission> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(GuardError::WorkflowStopped)?;

        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        let result = match self.policy {
            QueuePolicy::Block => send_blocking(&sender, event),
            QueuePolicy::Drop => match sender.try_send(event) {
                Ok(()) => Ok(Submission::Queued),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                    self.reject_queue_full(event);
                    return Ok(Submission::Dropped);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(GuardError::WorkflowStopped),
            },
        };

        if result.is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    /// Audit trail for a dropped escalation: OBJECT from `queue_full`
    fn reject_queue_full(&self, event: Event) {
        let total = self.shared.counters.record_dropped();
        self.shared.events.emit(GuardEvent::EscalationDropped {
            event_id: event.id.clone(),
            total,
        });

        let ruling = Ruling::new(Decision::Object).with_participants(vec!["ops:queue_full".to_string()]);
        let resolution = Resolution::new(&event, ruling, QUEUE_FULL_SOURCE, false, 0);
        self.shared.record(&event, resolution, BacklogWait::Bounded);
    }

    /// Escalations queued or being resolved
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn resolver_tag(&self) -> &str {
        self.shared.resolver.source_tag()
    }

    pub fn handshake_tokens(&self) -> u32 {
        self.shared.budget.available(Instant::now())
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Wait until nothing is pending. `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL);
        }
        true
    }

    /// Stop accepting work, drain what is queued, stop the runtime.
    /// `false` when escalations were still pending at the deadline.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let started = Instant::now();

        // Closing the channel ends the worker loops once the queue is empty
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.sender.lock().take();
        let drained = self.wait_idle(timeout);
        if !drained {
            log::warn!("Resolution workflow shutdown with {} escalation(s) pending", self.pending());
        }

        if let Some(runtime) = self.runtime.lock().take() {
            let remaining = timeout.saturating_sub(started.elapsed());
            runtime.shutdown_timeout(remaining.max(IDLE_POLL));
        }
        log::info!("Resolution workflow stopped");
        drained
    }
}

impl Drop for ResolutionWorkflow {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.sender.lock().take();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

/// Backpressure without `blocking_send`, which panics inside a runtime
fn send_blocking(sender: &mpsc::Sender<Event>, mut event: Event) -> GuardResult<Submission> {
    loop {
        match sender.try_send(event) {
            Ok(()) => return Ok(Submission::Queued),
            Err(mpsc::error::TrySendError::Full(back)) => {
                event = back;
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(GuardError::WorkflowStopped),
        }
    }
}
