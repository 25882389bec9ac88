//! Ingress Pipeline
//!
//! `process(packet) -> state`: validate, classify, debounce, chain the
//! event, escalate alerts, keep the rolling history. Safe to call from
//! many threads at once; the chain store orders the writes.
//!
//! ## Structure
//! - `packet.rs` - packet validation, context sanitisation, signal masking

pub mod packet;


use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::constants::{APP_NAME, APP_VERSION};
use crate::logic::chain::{verify_chain, ChainStore, ChainVerification, Keyring, RecordKind};
use crate::logic::config::GuardConfig;
use crate::logic::debounce::DebounceGate;
use crate::logic::error::{GuardError, GuardResult};
use crate::logic::events::{EventBus, GuardEvent, GuardSubscriber};
use crate::logic::model::{next_temperature, ThresholdSnapshot, TuningStep};
use crate::logic::resolution::{
    Actuator, DemoResolver, LogActuator, ResolutionWorkflow, Resolver, Submission,
};
use crate::logic::telemetry::{ChainStatus, GuardCounters, GuardMetrics, RollingHistory};
use crate::logic::threat::{Classifier, Event, GuardState, LogisticScorer, Scorer};

pub use packet::{bin_signal, mask_signals, sanitize_context, Packet};

/// Seed of the development resolver when none is injected
pub const DEMO_RESOLVER_SEED: u64 = 42;

/// Payload of a `self_refinement` chain record
#[derive(Debug, Clone, Serialize)]
struct SelfRefinementRecord {
    timestamp: DateTime<Utc>,
    previous_temperature: f64,
    new_temperature: f64,
    alert_ratio: f64,
    samples: usize,
    hi: f64,
    lo: f64,
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct GuardPipelineBuilder {
    config: GuardConfig,
    resolver: Option<Arc<dyn Resolver>>,
    actuator: Option<Arc<dyn Actuator>>,
    scorer: Option<Box<dyn Scorer>>,
    subscribers: Vec<Arc<dyn GuardSubscriber>>,
    log_events: bool,
    demo_seed: u64,
}

impl GuardPipelineBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    pub fn scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn subscriber(mut self, subscriber: Arc<dyn GuardSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Skip the default `LogSubscriber`
    pub fn without_logging(mut self) -> Self {
        self.log_events = false;
        self
    }

    /// Seed for the development fallback resolver
    pub fn demo_seed(mut self, seed: u64) -> Self {
        self.demo_seed = seed;
        self
    }

    /// Validate the configuration, open the chain and start the workers
    pub fn build(self) -> GuardResult<GuardPipeline> {
        let config = self.config;
        config.validate()?;

        let resolver: Arc<dyn Resolver> = match self.resolver {
            Some(r) => r,
            None if config.is_production() => {
                return Err(GuardError::config(
                    "production mode requires an injected resolver",
                ));
            }
            None => {
                log::warn!(
                    "No resolver injected: using the non-production demo resolver (seed {})",
                    self.demo_seed
                );
                Arc::new(DemoResolver::new(self.demo_seed))
            }
        };
        if config.is_production() && !resolver.is_production_ready() {
            return Err(GuardError::config(format!(
                "resolver '{}' is not allowed in production mode",
                resolver.source_tag()
            )));
        }

        let events = Arc::new(if self.log_events { EventBus::with_logging() } else { EventBus::new() });
        for s in self.subscribers {
            events.subscribe(s);
        }

        let chain = Arc::new(ChainStore::open(&config.chain)?.with_events(events.clone()));
        let counters = Arc::new(GuardCounters::new());
        let actuator = self.actuator.unwrap_or_else(|| Arc::new(LogActuator));

        let workflow = ResolutionWorkflow::start(
            &config.resolution,
            chain.clone(),
            resolver,
            actuator,
            events.clone(),
            counters.clone(),
        )?;

        let classifier = Classifier::new(
            self.scorer.unwrap_or_else(|| Box::new(LogisticScorer::default())),
            &config.thresholds,
        );

        log::info!(
            "{} v{} ready ({} mode, scorer {}, chain {:?})",
            APP_NAME,
            APP_VERSION,
            config.mode.as_str(),
            classifier.scorer_name(),
            config.chain.path
        );

        Ok(GuardPipeline {
            debounce: DebounceGate::new(config.debounce.clone()),
            history: RollingHistory::new(config.history_capacity),
            classifier,
            chain,
            workflow,
            events,
            counters,
            config,
        })
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct GuardPipeline {
    config: GuardConfig,
    classifier: Classifier,
    debounce: DebounceGate,
    chain: Arc<ChainStore>,
    workflow: ResolutionWorkflow,
    events: Arc<EventBus>,
    counters: Arc<GuardCounters>,
    history: RollingHistory,
}

impl GuardPipeline {
    pub fn builder(config: GuardConfig) -> GuardPipelineBuilder {
        GuardPipelineBuilder {
            config,
            resolver: None,
            actuator: None,
            scorer: None,
            subscribers: Vec::new(),
            log_events: true,
            demo_seed: DEMO_RESOLVER_SEED,
        }
    }

    /// Process a raw JSON packet. Malformed input is counted and reported
    /// as SECURE without a chain record.
    pub fn process(&self, raw: &Value) -> GuardState {
        match Packet::from_json(raw) {
            Ok(packet) => self.process_packet(packet),
            Err(e) => self.reject(e),
        }
    }

    /// Process an already-built packet
    pub fn process_packet(&self, packet: Packet) -> GuardState {
        if let Err(e) = packet.validate() {
            return self.reject(e);
        }

        let classification = self.classifier.classify_signals(packet.signals());
        let state = classification.state;
        let now = Instant::now();

        let suppressed = state.is_alerting()
            && self.debounce.should_suppress(state, now, classification.thresholds.temperature);

        let context = sanitize_context(packet.context(), &self.config.context);
        let mut event = Event::new(&self.config.service_id, packet.signals().to_vec(), &classification, context);
        event.suppressed = suppressed;

        let chained = match self.chain.append(RecordKind::Event, &event) {
            Ok(link) => {
                event.digest = Some(link.digest);
                event.prev = link.prev;
                true
            }
            Err(e) => {
                self.counters.record_chain_error();
                log::error!("[{}] event could not be chained: {}", event.short_id(), e);
                // The alert will not be escalated, so it must not hold the window
                if state.is_alerting() && !suppressed {
                    self.debounce.release(state, now);
                }
                false
            }
        };

        let head = self.chain.head_prefix();
        self.events.emit(GuardEvent::PacketClassified {
            event_id: event.id.clone(),
            state,
            score: event.score,
            head: head.clone(),
            signals: mask_signals(&event.signals, self.config.forensics),
        });

        let total = self.counters.record_state(state);
        self.history.push(event.score, state, now);

        if state.is_alerting() {
            if suppressed {
                self.counters.record_suppressed();
                self.events.emit(GuardEvent::AlertSuppressed {
                    event_id: event.id.clone(),
                    state,
                    score: event.score,
                });
            } else {
                self.events.emit(GuardEvent::AlertRaised {
                    event_id: event.id.clone(),
                    state,
                    score: event.score,
                    head,
                });
                if chained {
                    self.escalate(event);
                } else {
                    log::warn!("[{}] not escalated: event record missing from the chain", event.short_id());
                }
            }
        }

        let every = self.config.self_tune.every;
        if every > 0 && total % every == 0 {
            if let Err(e) = self.self_refine() {
                log::error!("Self-refinement failed: {}", e);
            }
        }

        state
    }

    fn escalate(&self, event: Event) {
        let event_id = event.id.clone();
        let state = event.state;

        match self.workflow.submit(event) {
            Ok(Submission::Queued) => {
                self.counters.record_escalated();
                self.events.emit(GuardEvent::EscalationQueued { event_id, state });
            }
            Ok(Submission::Dropped) => {}
            Err(e) => {
                log::error!("Escalation of {} failed: {}", event_id, e);
            }
        }
    }

    fn reject(&self, error: GuardError) -> GuardState {
        let reason = match error {
            GuardError::Malformed(reason) => reason,
            other => other.to_string(),
        };
        let total = self.counters.record_malformed();
        self.events.emit(GuardEvent::MalformedPacket { reason, total });
        GuardState::Secure
    }

    // ------------------------------------------------------------------------
    // Operator controls
    // ------------------------------------------------------------------------

    /// Replace hi and/or lo atomically. Invalid pairs change nothing.
    pub fn adjust_thresholds(&self, hi: Option<f64>, lo: Option<f64>) -> GuardResult<ThresholdSnapshot> {
        let snapshot = self.classifier.thresholds().adjust(hi, lo)?;
        self.events.emit(GuardEvent::ThresholdsAdjusted {
            hi: snapshot.hi,
            lo: snapshot.lo,
        });
        Ok(snapshot)
    }

    /// Clamped to [-1, 1]; returns the value actually applied
    pub fn set_temperature(&self, value: f64) -> GuardResult<f64> {
        let thresholds = self.classifier.thresholds();
        let previous = thresholds.set_temperature(value)?;
        let current = thresholds.temperature();
        self.events.emit(GuardEvent::TemperatureChanged { previous, current });
        Ok(current)
    }

    /// One self-tuning pass over the rolling history. A change of
    /// temperature is written to the chain as a `self_refinement` record.
    pub fn self_refine(&self) -> GuardResult<TuningStep> {
        let thresholds = self.classifier.thresholds();
        let tune = &self.config.self_tune;

        let samples = self.history.len();
        let alert_ratio = self.history.alert_ratio();
        let previous = thresholds.temperature();

        let mut step = TuningStep {
            previous_temperature: previous,
            new_temperature: previous,
            alert_ratio,
            samples,
        };
        if samples < tune.min_samples {
            return Ok(step);
        }

        step.new_temperature = next_temperature(previous, alert_ratio, tune.max_alert_ratio, tune.step);
        if !step.changed() {
            return Ok(step);
        }

        thresholds.set_temperature(step.new_temperature)?;
        let snapshot = thresholds.snapshot();

        self.chain.append(
            RecordKind::SelfRefinement,
            &SelfRefinementRecord {
                timestamp: Utc::now(),
                previous_temperature: step.previous_temperature,
                new_temperature: step.new_temperature,
                alert_ratio,
                samples,
                hi: snapshot.hi,
                lo: snapshot.lo,
            },
        )?;

        self.events.emit(GuardEvent::SelfRefined {
            previous_temperature: step.previous_temperature,
            new_temperature: step.new_temperature,
            alert_ratio,
        });
        Ok(step)
    }

    // ------------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------------

    pub fn metrics(&self) -> GuardMetrics {
        GuardMetrics::compute(
            &self.history.entries(),
            self.counters.snapshot(),
            self.classifier.thresholds().snapshot(),
            ChainStatus {
                head_prefix: self.chain.head_prefix(),
                backlog: self.chain.backlog_len(),
            },
            self.workflow.handshake_tokens(),
        )
    }

    /// Replay this pipeline's chain with its configured keyring
    pub fn verify(&self) -> GuardResult<ChainVerification> {
        let keyring = Keyring::from_config(&self.config.chain);
        Ok(verify_chain(self.chain.path(), &keyring)?)
    }

    pub fn thresholds(&self) -> ThresholdSnapshot {
        self.classifier.thresholds().snapshot()
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<ChainStore> {
        &self.chain
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn pending_escalations(&self) -> usize {
        self.workflow.pending()
    }

    /// Wait for queued escalations to finish. `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.workflow.wait_idle(timeout)
    }

    /// Drain the workflow and flush the chain backlog
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let drained = self.workflow.shutdown(timeout);
        let flushed = self.chain.flush();
        if !flushed {
            log::error!("Chain backlog not flushed at shutdown ({} records)", self.chain.backlog_len());
        }
        drained && flushed
    }
}
