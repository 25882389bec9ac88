//! Threat Types
//!
//! Core types for classification. No logic beyond trivial mapping.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::logic::model::ThresholdSnapshot;

// ============================================================================
// GUARD STATE
// ============================================================================

/// Three-level severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardState {
    /// Nothing to report
    Secure,
    /// Inside the vulnerable band, escalated for review
    Vulnerable,
    /// At or above hi
    Critical,
}

impl GuardState {
    pub const ALL: [GuardState; 3] = [GuardState::Secure, GuardState::Vulnerable, GuardState::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            GuardState::Secure => "SECURE",
            GuardState::Vulnerable => "VULNERABLE",
            GuardState::Critical => "CRITICAL",
        }
    }

    /// SECURE never alerts
    pub fn is_alerting(&self) -> bool {
        !matches!(self, GuardState::Secure)
    }

    pub fn index(&self) -> usize {
        match self {
            GuardState::Secure => 0,
            GuardState::Vulnerable => 1,
            GuardState::Critical => 2,
        }
    }
}

impl Default for GuardState {
    fn default() -> Self {
        GuardState::Secure
    }
}

impl std::fmt::Display for GuardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// Score + state + the boundaries that produced them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub score: f64,
    pub state: GuardState,
    pub thresholds: ThresholdSnapshot,
}

// ============================================================================
// EVENT RECORD
// ============================================================================

/// One classified packet, as written to the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub service_id: String,
    pub signals: Vec<f64>,
    pub score: f64,
    pub state: GuardState,

    /// Effective boundaries at classification time
    pub hi: f64,
    pub lo: f64,
    pub temperature: f64,

    /// Sanitised, allow-listed context
    #[serde(default)]
    pub context: BTreeMap<String, Value>,

    /// Alert held back by the debounce gate
    #[serde(default)]
    pub suppressed: bool,

    #[serde(skip)]
    pub digest: Option<String>,
    #[serde(skip)]
    pub prev: Option<String>,
}

impl Event {
    pub fn new(
        service_id: &str,
        signals: Vec<f64>,
        classification: &Classification,
        context: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            service_id: service_id.to_string(),
            signals,
            score: classification.score,
            state: classification.state,
            hi: classification.thresholds.hi,
            lo: classification.thresholds.lo,
            temperature: classification.thresholds.temperature,
            context,
            suppressed: false,
            digest: None,
            prev: None,
        }
    }

    /// First 8 characters of the id, for log prefixes
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&GuardState::Vulnerable).unwrap();
        assert_eq!(json, "\"VULNERABLE\"");
        let back: GuardState = serde_json::from_str("\"CRITICAL\"").unwrap();
        assert_eq!(back, GuardState::Critical);
    }

    #[test]
    fn test_alerting_states() {
        assert!(!GuardState::Secure.is_alerting());
        assert!(GuardState::Vulnerable.is_alerting());
        assert!(GuardState::Critical.is_alerting());
    }
}
