//! Chain record format
//!
//! One UTF-8 JSON line per record: `{kind, digest, prev, payload}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// RECORD KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Resolution,
    Handshake,
    /// Last record of a file about to be archived
    Terminal,
    /// First record of a fresh file after rotation
    Continuation,
    SelfRefinement,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Event => "event",
            RecordKind::Resolution => "resolution",
            RecordKind::Handshake => "handshake",
            RecordKind::Terminal => "terminal",
            RecordKind::Continuation => "continuation",
            RecordKind::SelfRefinement => "self_refinement",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub kind: RecordKind,
    pub digest: String,
    pub prev: Option<String>,
    pub payload: Value,
}

impl ChainRecord {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Typed view of the payload
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// `source_event_id` (resolution/handshake) or `id` (event)
    pub fn event_id(&self) -> Option<&str> {
        let key = match self.kind {
            RecordKind::Event => "id",
            RecordKind::Resolution | RecordKind::Handshake => "source_event_id",
            _ => return None,
        };
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Position of a freshly appended record in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub digest: String,
    pub prev: Option<String>,

    /// `false` while the record only sits in the write backlog
    pub persisted: bool,
}

// ============================================================================
// ROTATION PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalPayload {
    pub reason: String,

    /// Head of the chain when rotation began
    pub head: Option<String>,

    pub file_bytes: u64,
    pub max_bytes: u64,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationPayload {
    /// Pre-rotation head (same value the terminal record references)
    pub continued_from: Option<String>,

    pub terminal_digest: String,

    /// File name of the archive
    pub archived: String,

    pub opened_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_line_format() {
        let record = ChainRecord {
            kind: RecordKind::SelfRefinement,
            digest: "d".repeat(64),
            prev: None,
            payload: json!({"alert_ratio": 0.5}),
        };
        let line = record.to_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"kind\":\"self_refinement\""));
        assert!(line.contains("\"prev\":null"));

        let back = ChainRecord::from_line(&line).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_event_id_lookup() {
        let event = ChainRecord {
            kind: RecordKind::Event,
            digest: String::new(),
            prev: None,
            payload: json!({"id": "e-1"}),
        };
        let resolution = ChainRecord {
            kind: RecordKind::Resolution,
            payload: json!({"id": "r-1", "source_event_id": "e-1"}),
            ..event.clone()
        };
        assert_eq!(event.event_id(), Some("e-1"));
        assert_eq!(resolution.event_id(), Some("e-1"));
    }
}
