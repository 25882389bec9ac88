//! Guard counters - lock-free totals shared by ingress and workers

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::logic::threat::GuardState;

#[derive(Debug, Default)]
pub struct GuardCounters {
    processed: AtomicU64,
    malformed: AtomicU64,
    suppressed: AtomicU64,
    escalated: AtomicU64,
    dropped: AtomicU64,
    resolutions: AtomicU64,
    timeouts: AtomicU64,
    handshakes: AtomicU64,
    handshakes_skipped: AtomicU64,
    actuator_failures: AtomicU64,
    chain_errors: AtomicU64,
    lost_records: AtomicU64,
    by_state: [AtomicU64; 3],
}

/// Plain copy of the counters at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub malformed: u64,
    pub suppressed: u64,
    pub escalated: u64,
    pub dropped: u64,
    pub resolutions: u64,
    pub timeouts: u64,
    pub handshakes: u64,
    pub handshakes_skipped: u64,
    pub actuator_failures: u64,
    pub chain_errors: u64,
    /// Resolutions or handshakes that never reached the chain
    pub lost_records: u64,
    pub secure: u64,
    pub vulnerable: u64,
    pub critical: u64,
}

impl GuardCounters {
    pub fn new() -> Self {
        Self::default()
    }

    // Each `record_*` returns the new total

    pub fn record_malformed(&self) -> u64 {
        self.malformed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_suppressed(&self) -> u64 {
        self.suppressed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_escalated(&self) -> u64 {
        self.escalated.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) -> u64 {
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_resolution(&self) -> u64 {
        self.resolutions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_timeout(&self) -> u64 {
        self.timeouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_handshake(&self) -> u64 {
        self.handshakes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_handshake_skipped(&self) -> u64 {
        self.handshakes_skipped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_actuator_failure(&self) -> u64 {
        self.actuator_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_chain_error(&self) -> u64 {
        self.chain_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_lost(&self) -> u64 {
        self.lost_records.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// One accepted packet in `state`; returns the running packet total
    pub fn record_state(&self, state: GuardState) -> u64 {
        self.by_state[state.index()].fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn state_count(&self, state: GuardState) -> u64 {
        self.by_state[state.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            processed: load(&self.processed),
            malformed: load(&self.malformed),
            suppressed: load(&self.suppressed),
            escalated: load(&self.escalated),
            dropped: load(&self.dropped),
            resolutions: load(&self.resolutions),
            timeouts: load(&self.timeouts),
            handshakes: load(&self.handshakes),
            handshakes_skipped: load(&self.handshakes_skipped),
            actuator_failures: load(&self.actuator_failures),
            chain_errors: load(&self.chain_errors),
            lost_records: load(&self.lost_records),
            secure: self.state_count(GuardState::Secure),
            vulnerable: self.state_count(GuardState::Vulnerable),
            critical: self.state_count(GuardState::Critical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counts_by_state() {
        let c = GuardCounters::new();
        c.record_state(GuardState::Critical);
        c.record_state(GuardState::Critical);
        assert_eq!(c.record_state(GuardState::Secure), 3);

        let snap = c.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.critical, 2);
        assert_eq!(snap.secure, 1);
        assert_eq!(snap.vulnerable, 0);
    }

    #[test]
    fn test_concurrent_bumps() {
        let c = Arc::new(GuardCounters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        c.record_malformed();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.snapshot().malformed, 4000);
    }
}
