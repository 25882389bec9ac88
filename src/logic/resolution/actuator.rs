//! Actuators - side effects of an AFFIRM decision
//!
//! Failures are logged and counted by the workflow; they never undo or
//! block the resolution record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::logic::threat::{Event, GuardState};
use super::types::Resolution;

pub trait Actuator: Send + Sync {
    fn on_affirm(&self, event: &Event, resolution: &Resolution) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

/// Only logs the confirmed violation
pub struct LogActuator;

impl Actuator for LogActuator {
    fn on_affirm(&self, event: &Event, resolution: &Resolution) -> anyhow::Result<()> {
        log::warn!(
            "[{}] {} confirmed by {} (resolution {})",
            event.short_id(),
            event.state,
            resolution.resolver,
            resolution.id
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

// ============================================================================
// QUARANTINE LEDGER
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineEntry {
    pub event_id: String,
    pub service_id: String,
    pub state: GuardState,
    pub score: f64,
    pub resolution_id: String,
    pub quarantined_at: DateTime<Utc>,
}

/// In-memory register of quarantined events
#[derive(Default)]
pub struct QuarantineLedger {
    entries: RwLock<HashMap<String, QuarantineEntry>>,
}

impl QuarantineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` when the event was already quarantined
    pub fn quarantine(&self, event: &Event, resolution: &Resolution) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&event.id) {
            return false;
        }
        entries.insert(
            event.id.clone(),
            QuarantineEntry {
                event_id: event.id.clone(),
                service_id: event.service_id.clone(),
                state: event.state,
                score: event.score,
                resolution_id: resolution.id.clone(),
                quarantined_at: Utc::now(),
            },
        );
        true
    }

    pub fn release(&self, event_id: &str) -> Option<QuarantineEntry> {
        self.entries.write().remove(event_id)
    }

    pub fn is_quarantined(&self, event_id: &str) -> bool {
        self.entries.read().contains_key(event_id)
    }

    pub fn get(&self, event_id: &str) -> Option<QuarantineEntry> {
        self.entries.read().get(event_id).cloned()
    }

    /// Oldest first
    pub fn list(&self) -> Vec<QuarantineEntry> {
        let mut list: Vec<_> = self.entries.read().values().cloned().collect();
        list.sort_by_key(|e| e.quarantined_at);
        list
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Actuator for QuarantineLedger {
    fn on_affirm(&self, event: &Event, resolution: &Resolution) -> anyhow::Result<()> {
        if !self.quarantine(event, resolution) {
            anyhow::bail!("event {} already quarantined", event.id);
        }
        log::warn!("[{}] quarantined ({} total)", event.short_id(), self.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "quarantine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::ThresholdConfig;
    use crate::logic::resolution::types::{Decision, Ruling};
    use crate::logic::threat::Classifier;
    use std::collections::BTreeMap;

    fn event_and_resolution() -> (Event, Resolution) {
        let classification = Classifier::with_defaults(&ThresholdConfig::default()).classify(1.8, 1.9, 0.2);
        let event = Event::new("svc", vec![1.8, 1.9, 0.2], &classification, BTreeMap::new());
        let resolution = Resolution::new(&event, Ruling::new(Decision::Affirm), "fixed_decision", false, 3);
        (event, resolution)
    }

    #[test]
    fn test_quarantine_ledger_registers_once() {
        let ledger = QuarantineLedger::new();
        let (event, resolution) = event_and_resolution();

        ledger.on_affirm(&event, &resolution).unwrap();
        assert!(ledger.is_quarantined(&event.id));
        assert_eq!(ledger.get(&event.id).unwrap().resolution_id, resolution.id);

        assert!(ledger.on_affirm(&event, &resolution).is_err());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_release() {
        let ledger = QuarantineLedger::new();
        let (event, resolution) = event_and_resolution();
        ledger.on_affirm(&event, &resolution).unwrap();

        let released = ledger.release(&event.id).unwrap();
        assert_eq!(released.state, GuardState::Critical);
        assert!(ledger.is_empty());
        assert!(ledger.release(&event.id).is_none());
    }
}
