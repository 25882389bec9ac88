//! Event Emitter - structured guard events
//!
//! The core only emits; subscribers decide how an event is shown,
//! shipped or counted. `LogSubscriber` is installed by default.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::logic::resolution::Decision;
use crate::logic::threat::GuardState;

/// Everything the guard reports to the outside world
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardEvent {
    PacketClassified {
        event_id: String,
        state: GuardState,
        score: f64,
        head: String,
        signals: Vec<String>,
    },
    AlertRaised {
        event_id: String,
        state: GuardState,
        score: f64,
        head: String,
    },
    AlertSuppressed {
        event_id: String,
        state: GuardState,
        score: f64,
    },
    MalformedPacket {
        reason: String,
        total: u64,
    },
    EscalationQueued {
        event_id: String,
        state: GuardState,
    },
    EscalationDropped {
        event_id: String,
        total: u64,
    },
    ResolutionRecorded {
        resolution_id: String,
        event_id: String,
        decision: Decision,
        resolver: String,
        timed_out: bool,
    },
    HandshakeRecorded {
        handshake_id: String,
        resolution_id: String,
    },
    HandshakeSkipped {
        resolution_id: String,
    },
    ChainRotated {
        archived: String,
        continued_from: String,
    },
    ChainWriteFailed {
        error: String,
    },
    ThresholdsAdjusted {
        hi: f64,
        lo: f64,
    },
    TemperatureChanged {
        previous: f64,
        current: f64,
    },
    SelfRefined {
        previous_temperature: f64,
        new_temperature: f64,
        alert_ratio: f64,
    },
}

impl GuardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GuardEvent::PacketClassified { .. } => "packet_classified",
            GuardEvent::AlertRaised { .. } => "alert_raised",
            GuardEvent::AlertSuppressed { .. } => "alert_suppressed",
            GuardEvent::MalformedPacket { .. } => "malformed_packet",
            GuardEvent::EscalationQueued { .. } => "escalation_queued",
            GuardEvent::EscalationDropped { .. } => "escalation_dropped",
            GuardEvent::ResolutionRecorded { .. } => "resolution_recorded",
            GuardEvent::HandshakeRecorded { .. } => "handshake_recorded",
            GuardEvent::HandshakeSkipped { .. } => "handshake_skipped",
            GuardEvent::ChainRotated { .. } => "chain_rotated",
            GuardEvent::ChainWriteFailed { .. } => "chain_write_failed",
            GuardEvent::ThresholdsAdjusted { .. } => "thresholds_adjusted",
            GuardEvent::TemperatureChanged { .. } => "temperature_changed",
            GuardEvent::SelfRefined { .. } => "self_refined",
        }
    }
}

/// Receives guard events. Must not block.
pub trait GuardSubscriber: Send + Sync {
    fn on_event(&self, event: &GuardEvent);
}

/// Fan-out to all subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn GuardSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with the log subscriber attached
    pub fn with_logging() -> Self {
        let bus = Self::new();
        bus.subscribe(Arc::new(LogSubscriber));
        bus
    }

    pub fn subscribe(&self, subscriber: Arc<dyn GuardSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn emit(&self, event: GuardEvent) {
        let subscribers = self.subscribers.read();
        for s in subscribers.iter() {
            s.on_event(&event);
        }
    }
}

// ============================================================================
// SUBSCRIBERS
// ============================================================================

/// Renders events through the `log` facade
pub struct LogSubscriber;

impl GuardSubscriber for LogSubscriber {
    fn on_event(&self, event: &GuardEvent) {
        match event {
            GuardEvent::PacketClassified { event_id, state, score, head, signals } => {
                log::debug!("[{}|{}] {} | score={:.4} | signals={:?}", short(event_id), head, state, score, signals);
            }
            GuardEvent::AlertRaised { event_id, state, score, head } => {
                log::warn!("[{}|{}] {} alert | score={:.4}", short(event_id), head, state, score);
            }
            GuardEvent::AlertSuppressed { event_id, state, score } => {
                log::info!("[{}] {} alert suppressed (debounce) | score={:.4}", short(event_id), state, score);
            }
            GuardEvent::MalformedPacket { reason, total } => {
                log::warn!("Malformed packet dropped ({} total): {}", total, reason);
            }
            GuardEvent::EscalationQueued { event_id, state } => {
                log::info!("[{}] {} escalated for resolution", short(event_id), state);
            }
            GuardEvent::EscalationDropped { event_id, total } => {
                log::error!("[{}] resolution queue full, escalation rejected ({} total)", short(event_id), total);
            }
            GuardEvent::ResolutionRecorded { resolution_id, event_id, decision, resolver, timed_out } => {
                if *timed_out {
                    log::warn!("[{}] resolver timeout, defaulting to {} (event {})", short(resolution_id), decision, short(event_id));
                } else {
                    log::info!("[{}] resolution {} via {} (event {})", short(resolution_id), decision, resolver, short(event_id));
                }
            }
            GuardEvent::HandshakeRecorded { handshake_id, resolution_id } => {
                log::info!("[{}] handshake recorded for resolution {}", short(handshake_id), short(resolution_id));
            }
            GuardEvent::HandshakeSkipped { resolution_id } => {
                log::debug!("[{}] handshake skipped (budget exhausted)", short(resolution_id));
            }
            GuardEvent::ChainRotated { archived, continued_from } => {
                log::info!("Chain rotated to {} (continued from {})", archived, short(continued_from));
            }
            GuardEvent::ChainWriteFailed { error } => {
                log::error!("Chain write failed: {}", error);
            }
            GuardEvent::ThresholdsAdjusted { hi, lo } => {
                log::info!("Thresholds adjusted: hi={:.4} lo={:.4}", hi, lo);
            }
            GuardEvent::TemperatureChanged { previous, current } => {
                log::info!("Temperature {:.3} -> {:.3}", previous, current);
            }
            GuardEvent::SelfRefined { previous_temperature, new_temperature, alert_ratio } => {
                log::info!(
                    "Self-refinement: temperature {:.3} -> {:.3} (alert ratio {:.2})",
                    previous_temperature, new_temperature, alert_ratio
                );
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct MemorySubscriber {
    events: parking_lot::Mutex<Vec<GuardEvent>>,
}

impl MemorySubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GuardEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl GuardSubscriber for MemorySubscriber {
    fn on_event(&self, event: &GuardEvent) {
        self.events.lock().push(event.clone());
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out() {
        let bus = EventBus::new();
        let a = Arc::new(MemorySubscriber::new());
        let b = Arc::new(MemorySubscriber::new());
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.emit(GuardEvent::ThresholdsAdjusted { hi: 0.8, lo: 0.6 });

        assert_eq!(a.count("thresholds_adjusted"), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = GuardEvent::MalformedPacket { reason: "missing signal_a".into(), total: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "malformed_packet");
        assert_eq!(json["total"], 3);
    }
}
