//! Debounce Gate
//!
//! Per-state alert suppression. Windows shrink as the temperature rises:
//! window = base / (1 + k * t), bounded so it never collapses to zero.
//! Only monotonic `Instant`s are accepted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::{DEBOUNCE_TEMPERATURE_K, MIN_DEBOUNCE_SECS};
use crate::logic::config::DebounceConfig;
use crate::logic::threat::GuardState;

/// Scale factor bounds for (1 + k * t)
const SCALE_MIN: f64 = 0.6;
const SCALE_MAX: f64 = 1.4;

pub struct DebounceGate {
    config: DebounceConfig,
    last_fired: Mutex<HashMap<GuardState, Instant>>,
}

impl DebounceGate {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Effective window for `state` at the given temperature
    pub fn window(&self, state: GuardState, temperature: f64) -> Duration {
        let base = match state {
            GuardState::Critical => self.config.critical_window,
            _ => self.config.vulnerable_window,
        };
        let t = if temperature.is_finite() { temperature.clamp(-1.0, 1.0) } else { 0.0 };
        let scale = (1.0 + DEBOUNCE_TEMPERATURE_K * t).clamp(SCALE_MIN, SCALE_MAX);
        let secs = (base.as_secs_f64() / scale).max(MIN_DEBOUNCE_SECS);
        Duration::from_secs_f64(secs)
    }

    /// `true` = suppress. SECURE never alerts, so it is always suppressed.
    ///
    /// A suppressed alert does not move `last_fired`; a cleared one does.
    pub fn should_suppress(&self, state: GuardState, now: Instant, temperature: f64) -> bool {
        if !state.is_alerting() {
            return true;
        }

        let window = self.window(state, temperature);
        let mut last = self.last_fired.lock();

        if let Some(prev) = last.get(&state) {
            // saturating: a caller passing an older `now` reads as "inside window"
            if now.saturating_duration_since(*prev) < window {
                return true;
            }
        }

        last.insert(state, now);
        false
    }

    /// Give back a window opened at `fired_at` whose alert never went out.
    /// A later alert that already moved the window is left alone.
    pub fn release(&self, state: GuardState, fired_at: Instant) {
        let mut last = self.last_fired.lock();
        if last.get(&state) == Some(&fired_at) {
            last.remove(&state);
        }
    }

    /// Forget all timestamps
    pub fn reset(&self) {
        self.last_fired.lock().clear();
    }
}
