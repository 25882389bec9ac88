//! Rolling history - bounded window of recent classifications

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use crate::logic::threat::GuardState;

#[derive(Debug, Clone, Copy)]
pub struct HistoryEntry {
    pub score: f64,
    pub state: GuardState,
    pub at: Instant,
}

/// Oldest entries are evicted once `capacity` is reached
pub struct RollingHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, score: f64, state: GuardState, at: Instant) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry { score, state, at });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the window, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().copied().collect()
    }

    /// Fraction of VULNERABLE/CRITICAL entries (0 when empty)
    pub fn alert_ratio(&self) -> f64 {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return 0.0;
        }
        let alerts = entries.iter().filter(|e| e.state.is_alerting()).count();
        alerts as f64 / entries.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_evicted() {
        let h = RollingHistory::new(3);
        let now = Instant::now();
        for i in 0..5 {
            h.push(i as f64 / 10.0, GuardState::Secure, now);
        }
        let scores: Vec<f64> = h.entries().iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![0.2, 0.3, 0.4]);
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_alert_ratio() {
        let h = RollingHistory::new(10);
        assert_eq!(h.alert_ratio(), 0.0);
        let now = Instant::now();
        h.push(0.9, GuardState::Critical, now);
        h.push(0.7, GuardState::Vulnerable, now);
        h.push(0.1, GuardState::Secure, now);
        h.push(0.1, GuardState::Secure, now);
        assert!((h.alert_ratio() - 0.5).abs() < 1e-12);
    }
}
