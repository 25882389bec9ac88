//! Resolution Types
//!
//! Three-valued decision, resolver ruling, and the resolution / handshake
//! records written to the chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::threat::Event;

// ============================================================================
// DECISION
// ============================================================================

/// OBJECT (-1) / OBSERVE (0) / AFFIRM (+1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    #[serde(alias = "REJECT")]
    Object,
    /// Still pending; never final
    #[serde(alias = "PENDING")]
    Observe,
    #[serde(alias = "CONFIRM")]
    Affirm,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Object => "OBJECT",
            Decision::Observe => "OBSERVE",
            Decision::Affirm => "AFFIRM",
        }
    }

    pub fn value(&self) -> i8 {
        match self {
            Decision::Object => -1,
            Decision::Observe => 0,
            Decision::Affirm => 1,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Decision::Object),
            0 => Some(Decision::Observe),
            1 => Some(Decision::Affirm),
            _ => None,
        }
    }

    /// Case-insensitive, accepts both naming schemes
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "OBJECT" | "REJECT" => Some(Decision::Object),
            "OBSERVE" | "PENDING" => Some(Decision::Observe),
            "AFFIRM" | "CONFIRM" => Some(Decision::Affirm),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Decision::Observe)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a resolver answered on one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruling {
    pub decision: Decision,
    pub participants: Vec<String>,
}

impl Ruling {
    pub fn new(decision: Decision) -> Self {
        Self { decision, participants: Vec::new() }
    }

    pub fn pending() -> Self {
        Self::new(Decision::Observe)
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }
}

// ============================================================================
// RESOLUTION RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_event_id: String,
    pub decision: Decision,
    pub participants: Vec<String>,

    /// Which resolver produced the decision
    pub resolver: String,

    /// Decision defaulted to OBJECT because the deadline passed
    pub timed_out: bool,
    pub waited_ms: u64,

    #[serde(skip)]
    pub digest: Option<String>,
    #[serde(skip)]
    pub prev: Option<String>,
}

impl Resolution {
    pub fn new(event: &Event, ruling: Ruling, resolver: &str, timed_out: bool, waited_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_event_id: event.id.clone(),
            decision: ruling.decision,
            participants: ruling.participants,
            resolver: resolver.to_string(),
            timed_out,
            waited_ms,
            digest: None,
            prev: None,
        }
    }
}

// ============================================================================
// HANDSHAKE RECORD
// ============================================================================

/// Post-resolution note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source_event_id: String,
    pub resolution_id: String,
    pub what_happened: String,
    pub what_was_learned: String,
    pub why: String,
    pub how_to_improve: String,

    #[serde(skip)]
    pub digest: Option<String>,
    #[serde(skip)]
    pub prev: Option<String>,
}

impl Handshake {
    pub fn summarize(event: &Event, resolution: &Resolution) -> Self {
        let what_happened = format!(
            "{} packet scored {:.4} against hi={:.4} lo={:.4} (temperature {:.3})",
            event.state, event.score, event.hi, event.lo, event.temperature
        );

        let (what_was_learned, how_to_improve) = match (resolution.decision, resolution.timed_out) {
            (_, true) => (
                "No decision arrived before the deadline; defaulted to OBJECT".to_string(),
                "Check resolver availability or raise the resolver timeout".to_string(),
            ),
            (Decision::Affirm, _) => (
                "Alert confirmed as a real violation".to_string(),
                "Keep current thresholds; review the actuator outcome".to_string(),
            ),
            _ => (
                "Alert rejected by the resolver".to_string(),
                "Consider cooling the temperature if rejections persist".to_string(),
            ),
        };

        let why = if resolution.participants.is_empty() {
            format!("decided by {}", resolution.resolver)
        } else {
            format!(
                "decided by {} ({})",
                resolution.resolver,
                resolution.participants.join(", ")
            )
        };

        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source_event_id: event.id.clone(),
            resolution_id: resolution.id.clone(),
            what_happened,
            what_was_learned,
            why,
            how_to_improve,
            digest: None,
            prev: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_names() {
        assert_eq!(serde_json::to_string(&Decision::Affirm).unwrap(), "\"AFFIRM\"");
        let d: Decision = serde_json::from_str("\"REJECT\"").unwrap();
        assert_eq!(d, Decision::Object);
        let d: Decision = serde_json::from_str("\"CONFIRM\"").unwrap();
        assert_eq!(d, Decision::Affirm);
    }

    #[test]
    fn test_decision_parse_and_values() {
        assert_eq!(Decision::parse("pending"), Some(Decision::Observe));
        assert_eq!(Decision::parse(" affirm "), Some(Decision::Affirm));
        assert_eq!(Decision::parse("maybe"), None);
        assert_eq!(Decision::from_value(-1), Some(Decision::Object));
        assert_eq!(Decision::Affirm.value(), 1);
        assert!(!Decision::Observe.is_final());
        assert!(Decision::Object.is_final());
    }
}
