//! Adaptive Threshold State
//!
//! Base hi/lo pair + a bounded temperature bias that shifts both
//! boundaries together. The whole state sits behind one lock, so a reader
//! always observes a consistent (hi, lo, temperature) triple.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_SENSITIVITY, DEFAULT_THRESHOLD_HI, DEFAULT_THRESHOLD_LO, DEFAULT_VULNERABLE_MARGIN,
    THRESHOLD_EPSILON,
};
use crate::logic::error::{GuardError, GuardResult};

/// Effective hi is kept inside this range
const HI_FLOOR: f64 = 0.05;
const HI_CEIL: f64 = 0.99;
/// Effective lo floor
const LO_FLOOR: f64 = 0.01;
/// Allowed vulnerable band width
const MARGIN_MIN: f64 = 0.02;
const MARGIN_MAX: f64 = 0.5;

/// Threshold Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Base CRITICAL boundary (0.0 - 1.0)
    pub hi: f64,

    /// Base VULNERABLE floor (0.0 - 1.0)
    pub lo: f64,

    /// Band below hi that still counts as VULNERABLE
    pub vulnerable_margin: f64,

    /// Threshold shift per unit of temperature
    pub sensitivity: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            hi: DEFAULT_THRESHOLD_HI,
            lo: DEFAULT_THRESHOLD_LO,
            vulnerable_margin: DEFAULT_VULNERABLE_MARGIN,
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> GuardResult<()> {
        validate_pair(self.hi, self.lo)?;
        if !self.vulnerable_margin.is_finite() || self.vulnerable_margin <= 0.0 {
            return Err(GuardError::InvalidThresholds(format!(
                "vulnerable margin {} must be positive",
                self.vulnerable_margin
            )));
        }
        if !self.sensitivity.is_finite() || self.sensitivity < 0.0 {
            return Err(GuardError::InvalidThresholds(format!(
                "sensitivity {} must be >= 0",
                self.sensitivity
            )));
        }
        Ok(())
    }
}

fn validate_pair(hi: f64, lo: f64) -> GuardResult<()> {
    if !(hi.is_finite() && hi > 0.0 && hi < 1.0) {
        return Err(GuardError::InvalidThresholds(format!("hi {} outside (0, 1)", hi)));
    }
    if !(lo.is_finite() && lo > 0.0 && lo < 1.0) {
        return Err(GuardError::InvalidThresholds(format!("lo {} outside (0, 1)", lo)));
    }
    if lo > hi - THRESHOLD_EPSILON {
        return Err(GuardError::InvalidThresholds(format!(
            "lo {} must stay below hi {} by at least {}",
            lo, hi, THRESHOLD_EPSILON
        )));
    }
    Ok(())
}

/// Point-in-time view of the effective boundaries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    pub hi: f64,
    pub lo: f64,
    pub margin: f64,
    pub temperature: f64,
}

impl ThresholdSnapshot {
    /// Lower edge of the VULNERABLE band: max(lo, hi - margin)
    pub fn vulnerable_floor(&self) -> f64 {
        self.lo.max(self.hi - self.margin)
    }
}

#[derive(Debug, Clone)]
struct ThresholdState {
    base_hi: f64,
    base_lo: f64,
    margin: f64,
    sensitivity: f64,
    temperature: f64,
}

impl ThresholdState {
    fn snapshot(&self) -> ThresholdSnapshot {
        let shift = self.temperature * self.sensitivity;
        let hi = (self.base_hi + shift).clamp(HI_FLOOR, HI_CEIL);
        let lo = (self.base_lo + shift).clamp(LO_FLOOR, hi - THRESHOLD_EPSILON);
        ThresholdSnapshot {
            hi,
            lo,
            margin: self.margin,
            temperature: self.temperature,
        }
    }
}

/// Lock-protected, runtime-adjustable thresholds
#[derive(Debug)]
pub struct AdaptiveThresholds {
    state: RwLock<ThresholdState>,
}

impl AdaptiveThresholds {
    pub fn new(config: &ThresholdConfig) -> Self {
        Self {
            state: RwLock::new(ThresholdState {
                base_hi: config.hi,
                base_lo: config.lo,
                margin: config.vulnerable_margin.clamp(MARGIN_MIN, MARGIN_MAX),
                sensitivity: config.sensitivity,
                temperature: 0.0,
            }),
        }
    }

    /// Current effective boundaries
    pub fn snapshot(&self) -> ThresholdSnapshot {
        self.state.read().snapshot()
    }

    pub fn temperature(&self) -> f64 {
        self.state.read().temperature
    }

    /// Replace one or both base boundaries in a single step.
    ///
    /// The resulting pair is validated before anything is written.
    pub fn adjust(&self, hi: Option<f64>, lo: Option<f64>) -> GuardResult<ThresholdSnapshot> {
        let mut state = self.state.write();
        let new_hi = hi.unwrap_or(state.base_hi);
        let new_lo = lo.unwrap_or(state.base_lo);
        validate_pair(new_hi, new_lo)?;

        state.base_hi = new_hi;
        state.base_lo = new_lo;
        Ok(state.snapshot())
    }

    /// Set the temperature, clamped to [-1, 1]. Returns the previous value.
    pub fn set_temperature(&self, value: f64) -> GuardResult<f64> {
        if !value.is_finite() {
            return Err(GuardError::InvalidThresholds(format!(
                "temperature {} is not finite",
                value
            )));
        }
        let mut state = self.state.write();
        let previous = state.temperature;
        state.temperature = value.clamp(-1.0, 1.0);
        Ok(previous)
    }

    /// Band width below hi, clamped to a safe range
    pub fn set_margin(&self, margin: f64) -> GuardResult<()> {
        if !margin.is_finite() {
            return Err(GuardError::InvalidThresholds("margin is not finite".to_string()));
        }
        self.state.write().margin = margin.clamp(MARGIN_MIN, MARGIN_MAX);
        Ok(())
    }
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self::new(&ThresholdConfig::default())
    }
}

// ============================================================================
// SELF-TUNING
// ============================================================================

/// Outcome of one self-tuning pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningStep {
    pub previous_temperature: f64,
    pub new_temperature: f64,
    pub alert_ratio: f64,
    pub samples: usize,
}

impl TuningStep {
    pub fn changed(&self) -> bool {
        (self.new_temperature - self.previous_temperature).abs() > f64::EPSILON
    }
}

/// Next temperature given the recent alert ratio.
///
/// Too many alerts -> warm up (thresholds rise). Otherwise decay toward 0.
pub fn next_temperature(current: f64, alert_ratio: f64, max_alert_ratio: f64, step: f64) -> f64 {
    let next = if alert_ratio > max_alert_ratio {
        current + step
    } else if current > 0.0 {
        (current - step).max(0.0)
    } else if current < 0.0 {
        (current + step).min(0.0)
    } else {
        0.0
    };
    next.clamp(-1.0, 1.0)
}
