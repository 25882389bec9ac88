//! Metrics snapshot - derived from the rolling history and counters.
//! Computing it never changes guard state.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::logic::model::ThresholdSnapshot;
use crate::logic::threat::GuardState;
use super::counters::CounterSnapshot;
use super::history::HistoryEntry;

#[derive(Debug, Clone, Serialize)]
pub struct GuardMetrics {
    /// Nearest-rank percentiles over the history window
    pub p50: f64,
    pub p95: f64,

    /// States inside the history window
    pub counts_by_state: BTreeMap<GuardState, u64>,

    /// Packets per second across the history window
    pub ingress_rate: f64,

    pub chain_head: String,
    pub chain_backlog: usize,

    pub history_len: usize,
    pub temperature: f64,
    pub hi: f64,
    pub lo: f64,
    pub handshake_tokens: u32,

    /// Process-lifetime totals
    pub totals: CounterSnapshot,
}

/// Chain-side inputs for a snapshot
#[derive(Debug, Clone, Default)]
pub struct ChainStatus {
    pub head_prefix: String,
    pub backlog: usize,
}

impl GuardMetrics {
    pub fn compute(
        history: &[HistoryEntry],
        totals: CounterSnapshot,
        thresholds: ThresholdSnapshot,
        chain: ChainStatus,
        handshake_tokens: u32,
    ) -> Self {
        let mut scores: Vec<f64> = history.iter().map(|e| e.score).collect();
        scores.sort_by(|a, b| a.total_cmp(b));

        let mut counts_by_state: BTreeMap<GuardState, u64> =
            GuardState::ALL.iter().map(|s| (*s, 0)).collect();
        for entry in history {
            *counts_by_state.entry(entry.state).or_insert(0) += 1;
        }

        Self {
            p50: nearest_rank(&scores, 50.0),
            p95: nearest_rank(&scores, 95.0),
            counts_by_state,
            ingress_rate: ingress_rate(history),
            chain_head: chain.head_prefix,
            chain_backlog: chain.backlog,
            history_len: history.len(),
            temperature: thresholds.temperature,
            hi: thresholds.hi,
            lo: thresholds.lo,
            handshake_tokens,
            totals,
        }
    }
}

/// Nearest-rank percentile of an ascending slice (0 when empty)
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

fn ingress_rate(history: &[HistoryEntry]) -> f64 {
    let (first, last) = match (history.first(), history.last()) {
        (Some(f), Some(l)) if history.len() >= 2 => (f, l),
        _ => return 0.0,
    };
    let span = last.at.saturating_duration_since(first.at).as_secs_f64();
    if span <= 0.0 {
        return 0.0;
    }
    history.len() as f64 / span
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn thresholds() -> ThresholdSnapshot {
        ThresholdSnapshot { hi: 0.75, lo: 0.65, margin: 0.1, temperature: 0.0 }
    }

    #[test]
    fn test_nearest_rank() {
        let sorted: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        assert_eq!(nearest_rank(&sorted, 50.0), 10.0);
        assert_eq!(nearest_rank(&sorted, 95.0), 19.0);
        assert_eq!(nearest_rank(&sorted, 100.0), 20.0);
        assert_eq!(nearest_rank(&[0.4], 95.0), 0.4);
        assert_eq!(nearest_rank(&[], 50.0), 0.0);
    }

    #[test]
    fn test_compute_from_history() {
        let t0 = Instant::now();
        let history = vec![
            HistoryEntry { score: 0.9, state: GuardState::Critical, at: t0 },
            HistoryEntry { score: 0.1, state: GuardState::Secure, at: t0 + Duration::from_secs(1) },
            HistoryEntry { score: 0.2, state: GuardState::Secure, at: t0 + Duration::from_secs(2) },
            HistoryEntry { score: 0.7, state: GuardState::Vulnerable, at: t0 + Duration::from_secs(4) },
        ];
        let chain = ChainStatus { head_prefix: "abcdef0123456789".into(), backlog: 0 };

        let m = GuardMetrics::compute(&history, CounterSnapshot::default(), thresholds(), chain, 5);

        assert_eq!(m.p50, 0.2);
        assert_eq!(m.p95, 0.9);
        assert_eq!(m.counts_by_state[&GuardState::Secure], 2);
        assert_eq!(m.counts_by_state[&GuardState::Critical], 1);
        assert!((m.ingress_rate - 1.0).abs() < 1e-9);
        assert_eq!(m.chain_head, "abcdef0123456789");
        assert_eq!(m.handshake_tokens, 5);
    }

    #[test]
    fn test_empty_history() {
        let m = GuardMetrics::compute(&[], CounterSnapshot::default(), thresholds(), ChainStatus::default(), 0);
        assert_eq!(m.p50, 0.0);
        assert_eq!(m.ingress_rate, 0.0);
        assert_eq!(m.counts_by_state.len(), 3);
        assert_eq!(m.history_len, 0);
    }
}
