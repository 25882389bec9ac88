//! Packet validation and context sanitisation
//!
//! Raw input is untrusted JSON. Anything that is not a usable signal
//! vector is rejected here, before the classifier sees it.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::constants::{DENY_CONTEXT_KEYS, DENY_CONTEXT_SUBSTRINGS, MAX_CONTEXT_VALUE_LEN};
use crate::logic::config::ContextPolicy;
use crate::logic::error::{GuardError, GuardResult};

/// Minimum signal count (a, b, c)
pub const MIN_SIGNALS: usize = 3;

const NAMED_SIGNALS: [&str; 3] = ["signal_a", "signal_b", "signal_c"];

/// Validated ingress packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    signals: Vec<f64>,
    context: Map<String, Value>,
}

impl Packet {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self {
            signals: vec![a, b, c],
            context: Map::new(),
        }
    }

    pub fn from_signals(signals: Vec<f64>) -> Self {
        Self { signals, context: Map::new() }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn signals(&self) -> &[f64] {
        &self.signals
    }

    /// Raw (unsanitised) context
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// `signal_a/b/c` or a `signals` array (>= 3 numbers), optional `context`
    pub fn from_json(raw: &Value) -> GuardResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| GuardError::Malformed("packet is not a JSON object".to_string()))?;

        let signals = match obj.get("signals") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.as_f64()
                        .ok_or_else(|| GuardError::Malformed(format!("signals[{}] is not a number", i)))
                })
                .collect::<GuardResult<Vec<f64>>>()?,
            Some(_) => return Err(GuardError::Malformed("signals is not an array".to_string())),
            None => NAMED_SIGNALS
                .iter()
                .map(|name| match obj.get(*name) {
                    Some(v) => v
                        .as_f64()
                        .ok_or_else(|| GuardError::Malformed(format!("{} is not a number", name))),
                    None => Err(GuardError::Malformed(format!("missing {}", name))),
                })
                .collect::<GuardResult<Vec<f64>>>()?,
        };

        let context = match obj.get("context") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Err(GuardError::Malformed("context is not an object".to_string())),
        };

        let packet = Self { signals, context };
        packet.validate()?;
        Ok(packet)
    }

    /// Length and finiteness checks
    pub fn validate(&self) -> GuardResult<()> {
        if self.signals.len() < MIN_SIGNALS {
            return Err(GuardError::Malformed(format!(
                "need at least {} signals, got {}",
                MIN_SIGNALS,
                self.signals.len()
            )));
        }
        if let Some(i) = self.signals.iter().position(|s| !s.is_finite()) {
            return Err(GuardError::Malformed(format!("signal {} is not finite", i)));
        }
        Ok(())
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Lowercase keys, drop denied and non-allow-listed keys, keep scalars,
/// truncate long strings
pub fn sanitize_context(raw: &Map<String, Value>, policy: &ContextPolicy) -> BTreeMap<String, Value> {
    let mut clean = BTreeMap::new();

    for (key, value) in raw {
        let key = key.trim().to_lowercase();
        if is_denied(&key) || !policy.allow_keys.contains(&key) {
            continue;
        }

        let value = match value {
            Value::String(s) => Value::String(truncate(s, MAX_CONTEXT_VALUE_LEN)),
            Value::Number(_) | Value::Bool(_) => value.clone(),
            _ => continue,
        };
        clean.insert(key, value);
    }

    clean
}

pub fn is_denied(key: &str) -> bool {
    DENY_CONTEXT_KEYS.contains(&key) || DENY_CONTEXT_SUBSTRINGS.iter().any(|s| key.contains(s))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ============================================================================
// SIGNAL MASKING (logs)
// ============================================================================

/// Coarse bucket for a signal value
pub fn bin_signal(x: f64) -> &'static str {
    if x < 0.25 {
        "<0.25"
    } else if x < 0.5 {
        "0.25-0.5"
    } else if x < 1.0 {
        "0.5-1.0"
    } else if x < 1.5 {
        "1.0-1.5"
    } else {
        ">=1.5"
    }
}

/// Loggable form of the signals: raw in forensics mode, binned otherwise
pub fn mask_signals(signals: &[f64], forensics: bool) -> Vec<String> {
    signals
        .iter()
        .map(|s| {
            if forensics {
                format!("{:.4}", s)
            } else {
                bin_signal(*s).to_string()
            }
        })
        .collect()
}
