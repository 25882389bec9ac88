//! Signal Classifier
//!
//! Input: validated signal vector. Output: Classification.
//! Malformed input is rejected upstream; nothing here fails.

use crate::constants::{SIGNAL_MAX, SIGNAL_MIN};
use crate::logic::model::{AdaptiveThresholds, ThresholdConfig, ThresholdSnapshot};
use super::types::{Classification, GuardState};

// ============================================================================
// SCORER
// ============================================================================

/// Pluggable scalar scoring function
pub trait Scorer: Send + Sync {
    /// Raw score; the classifier clamps it to [0, 1]
    fn score(&self, signals: &[f64]) -> f64;

    fn name(&self) -> &str;
}

/// Logistic transform of a contrast term.
///
/// contrast = max(signals[..n-1]) - signals[n-1]
#[derive(Debug, Clone)]
pub struct LogisticScorer {
    /// Steepness
    pub k: f64,
    /// Contrast at which the score crosses 0.5
    pub center: f64,
}

impl Default for LogisticScorer {
    fn default() -> Self {
        Self { k: 6.0, center: 0.6 }
    }
}

impl LogisticScorer {
    fn contrast(signals: &[f64]) -> f64 {
        match signals.split_last() {
            Some((last, rest)) if !rest.is_empty() => {
                let peak = rest.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                peak - last
            }
            Some((only, _)) => *only,
            None => 0.0,
        }
    }
}

impl Scorer for LogisticScorer {
    fn score(&self, signals: &[f64]) -> f64 {
        let z = self.k * (Self::contrast(signals) - self.center);
        1.0 / (1.0 + (-z).exp())
    }

    fn name(&self) -> &str {
        "logistic-contrast"
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct Classifier {
    scorer: Box<dyn Scorer>,
    thresholds: AdaptiveThresholds,
}

impl Classifier {
    pub fn new(scorer: Box<dyn Scorer>, config: &ThresholdConfig) -> Self {
        Self {
            scorer,
            thresholds: AdaptiveThresholds::new(config),
        }
    }

    pub fn with_defaults(config: &ThresholdConfig) -> Self {
        Self::new(Box::new(LogisticScorer::default()), config)
    }

    pub fn thresholds(&self) -> &AdaptiveThresholds {
        &self.thresholds
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    /// Three-signal form
    pub fn classify(&self, a: f64, b: f64, c: f64) -> Classification {
        self.classify_signals(&[a, b, c])
    }

    pub fn classify_signals(&self, signals: &[f64]) -> Classification {
        let clamped: Vec<f64> = signals.iter().map(|s| clamp_signal(*s)).collect();
        let score = sanitize_score(self.scorer.score(&clamped));

        // One snapshot per call: the state is consistent with the recorded pair
        let thresholds = self.thresholds.snapshot();
        Classification {
            score,
            state: state_for(score, &thresholds),
            thresholds,
        }
    }
}

/// score >= hi => CRITICAL; score >= max(lo, hi - margin) => VULNERABLE
pub fn state_for(score: f64, thresholds: &ThresholdSnapshot) -> GuardState {
    if score >= thresholds.hi {
        GuardState::Critical
    } else if score >= thresholds.vulnerable_floor() {
        GuardState::Vulnerable
    } else {
        GuardState::Secure
    }
}

fn clamp_signal(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(SIGNAL_MIN, SIGNAL_MAX)
    } else {
        SIGNAL_MIN
    }
}

/// NaN/inf guard + clamp to [0, 1]
fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScorer(f64);

    impl Scorer for FixedScorer {
        fn score(&self, _signals: &[f64]) -> f64 {
            self.0
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_violation_packet_is_critical() {
        let classifier = Classifier::with_defaults(&ThresholdConfig::default());
        let result = classifier.classify(1.8, 1.9, 0.2);
        assert_eq!(result.state, GuardState::Critical);
        assert!(result.score > 0.99);
        assert_eq!(result.thresholds.hi, 0.75);
    }

    #[test]
    fn test_quiet_packet_is_secure() {
        let classifier = Classifier::with_defaults(&ThresholdConfig::default());
        let result = classifier.classify(0.2, 0.3, 1.2);
        assert_eq!(result.state, GuardState::Secure);
        assert!(result.score < 0.01);
    }

    #[test]
    fn test_score_always_in_unit_range() {
        let classifier = Classifier::with_defaults(&ThresholdConfig::default());
        let samples = [-10.0, -1.0, 0.0, 0.3, 1.0, 2.5, 5.0, 50.0, 1e9];
        for a in samples {
            for b in samples {
                for c in samples {
                    let r = classifier.classify(a, b, c);
                    assert!((0.0..=1.0).contains(&r.score));
                    assert_eq!(r.state, state_for(r.score, &r.thresholds));
                }
            }
        }
    }

    #[test]
    fn test_scorer_output_is_sanitized() {
        let config = ThresholdConfig::default();
        let nan = Classifier::new(Box::new(FixedScorer(f64::NAN)), &config);
        assert_eq!(nan.classify(1.0, 1.0, 1.0).score, 0.0);

        let big = Classifier::new(Box::new(FixedScorer(3.0)), &config);
        let r = big.classify(1.0, 1.0, 1.0);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.state, GuardState::Critical);
    }

    #[test]
    fn test_vulnerable_band() {
        let snap = ThresholdSnapshot { hi: 0.75, lo: 0.65, margin: 0.10, temperature: 0.0 };
        assert_eq!(state_for(0.75, &snap), GuardState::Critical);
        assert_eq!(state_for(0.70, &snap), GuardState::Vulnerable);
        assert_eq!(state_for(0.60, &snap), GuardState::Secure);

        // Narrow margin: floor is hi - margin, above lo
        let narrow = ThresholdSnapshot { margin: 0.02, ..snap };
        assert_eq!(state_for(0.70, &narrow), GuardState::Secure);
        assert_eq!(state_for(0.74, &narrow), GuardState::Vulnerable);
    }

    #[test]
    fn test_state_tracks_threshold_adjustment() {
        let classifier = Classifier::new(Box::new(FixedScorer(0.85)), &ThresholdConfig::default());
        assert_eq!(classifier.classify(0.0, 0.0, 0.0).state, GuardState::Critical);

        classifier.thresholds().adjust(Some(0.9), Some(0.75)).unwrap();
        let r = classifier.classify(0.0, 0.0, 0.0);
        assert_eq!(r.state, GuardState::Vulnerable);
        assert_eq!(r.thresholds.hi, 0.9);
    }

    #[test]
    fn test_n_vector_contrast() {
        let scorer = LogisticScorer::default();
        let three = scorer.score(&[1.8, 1.9, 0.2]);
        let five = scorer.score(&[0.1, 1.9, 0.3, 1.2, 0.2]);
        assert!((three - five).abs() < 1e-12);
    }
}
