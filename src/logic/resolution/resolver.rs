//! Resolvers - who decides an escalated event
//!
//! A resolver is polled until it answers something other than OBSERVE.
//! Errors never propagate past the workflow; they count as "still pending".

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::constants::HTTP_RESOLVER_TIMEOUT_SECS;
use crate::logic::threat::Event;
use super::types::{Decision, Ruling};

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("network error: {0}")]
    Network(String),

    #[error("resolver returned HTTP {0}")]
    Status(u16),

    #[error("unreadable reply: {0}")]
    BadReply(String),

    #[error("{0}")]
    Other(String),
}

/// Capability injected into the resolution workflow
pub trait Resolver: Send + Sync {
    /// One poll. `Decision::Observe` = ask again later.
    fn resolve(&self, event: &Event) -> Result<Ruling, ResolverError>;

    /// Recorded on every resolution this resolver produces
    fn source_tag(&self) -> &str;

    /// Production mode refuses resolvers that answer this with `false`
    fn is_production_ready(&self) -> bool {
        true
    }
}

// ============================================================================
// FIXED RESOLVERS
// ============================================================================

/// Never decides; every escalation runs into the timeout
pub struct AlwaysPending;

impl Resolver for AlwaysPending {
    fn resolve(&self, _event: &Event) -> Result<Ruling, ResolverError> {
        Ok(Ruling::pending())
    }

    fn source_tag(&self) -> &str {
        "always_pending"
    }
}

/// Same decision for every event
pub struct FixedDecision {
    decision: Decision,
    participants: Vec<String>,
}

impl FixedDecision {
    pub fn new(decision: Decision) -> Self {
        Self { decision, participants: Vec::new() }
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }
}

impl Resolver for FixedDecision {
    fn resolve(&self, _event: &Event) -> Result<Ruling, ResolverError> {
        Ok(Ruling::new(self.decision).with_participants(self.participants.clone()))
    }

    fn source_tag(&self) -> &str {
        "fixed_decision"
    }
}

// ============================================================================
// HTTP RESOLVER
// ============================================================================

/// POSTs the event JSON; expects `{"decision": .., "participants": [..]}`.
/// `decision` may be a name (AFFIRM, CONFIRM, ..) or -1 / 0 / 1.
pub struct HttpResolver {
    url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct HttpReply {
    decision: Value,
    #[serde(default)]
    participants: Vec<String>,
}

impl HttpResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(HTTP_RESOLVER_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Resolver for HttpResolver {
    fn resolve(&self, event: &Event) -> Result<Ruling, ResolverError> {
        let body = serde_json::to_string(event)
            .map_err(|e| ResolverError::Other(e.to_string()))?;

        let response = ureq::post(&self.url)
            .set("Content-Type", "application/json")
            .timeout(self.timeout)
            .send_string(&body);

        match response {
            Ok(resp) => {
                let text = resp
                    .into_string()
                    .map_err(|e| ResolverError::BadReply(e.to_string()))?;
                parse_reply(&text)
            }
            Err(ureq::Error::Status(code, _)) => Err(ResolverError::Status(code)),
            Err(e) => Err(ResolverError::Network(e.to_string())),
        }
    }

    fn source_tag(&self) -> &str {
        "http"
    }
}

/// Decode an HTTP resolver reply body
pub fn parse_reply(text: &str) -> Result<Ruling, ResolverError> {
    let reply: HttpReply = serde_json::from_str(text)
        .map_err(|e| ResolverError::BadReply(e.to_string()))?;

    let decision = match &reply.decision {
        Value::String(s) => Decision::parse(s),
        Value::Number(n) => n.as_i64().and_then(Decision::from_value),
        _ => None,
    }
    .ok_or_else(|| ResolverError::BadReply(format!("unknown decision {}", reply.decision)))?;

    Ok(Ruling::new(decision).with_participants(reply.participants))
}

// ============================================================================
// DEMO RESOLVER
// ============================================================================

/// Seeded coin flip weighted by the event score. Development only.
pub struct DemoResolver {
    rng: Mutex<StdRng>,
}

impl DemoResolver {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Resolver for DemoResolver {
    fn resolve(&self, event: &Event) -> Result<Ruling, ResolverError> {
        let roll: f64 = self.rng.lock().gen();
        let decision = if roll < event.score { Decision::Affirm } else { Decision::Object };
        Ok(Ruling::new(decision).with_participants(vec!["demo".to_string()]))
    }

    fn source_tag(&self) -> &str {
        "demo"
    }

    fn is_production_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::ThresholdConfig;
    use crate::logic::threat::Classifier;
    use std::collections::BTreeMap;

    fn event() -> Event {
        let classification = Classifier::with_defaults(&ThresholdConfig::default()).classify(1.8, 1.9, 0.2);
        Event::new("test", vec![1.8, 1.9, 0.2], &classification, BTreeMap::new())
    }

    #[test]
    fn test_parse_reply_accepts_names_and_numbers() {
        let r = parse_reply(r#"{"decision": "CONFIRM", "participants": ["alice"]}"#).unwrap();
        assert_eq!(r.decision, Decision::Affirm);
        assert_eq!(r.participants, vec!["alice".to_string()]);

        let r = parse_reply(r#"{"decision": -1}"#).unwrap();
        assert_eq!(r.decision, Decision::Object);
        assert!(r.participants.is_empty());

        let r = parse_reply(r#"{"decision": "pending"}"#).unwrap();
        assert!(!r.decision.is_final());
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        assert!(matches!(parse_reply("not json"), Err(ResolverError::BadReply(_))));
        assert!(matches!(parse_reply(r#"{"decision": 7}"#), Err(ResolverError::BadReply(_))));
        assert!(matches!(parse_reply(r#"{"decision": true}"#), Err(ResolverError::BadReply(_))));
    }

    #[test]
    fn test_demo_resolver_is_deterministic_and_never_pending() {
        let a = DemoResolver::new(7);
        let b = DemoResolver::new(7);
        let ev = event();
        for _ in 0..20 {
            let ra = a.resolve(&ev).unwrap();
            assert!(ra.decision.is_final());
            assert_eq!(ra, b.resolve(&ev).unwrap());
        }
        assert!(!a.is_production_ready());
    }

    #[test]
    fn test_fixed_resolvers() {
        let ev = event();
        assert_eq!(AlwaysPending.resolve(&ev).unwrap().decision, Decision::Observe);
        let fixed = FixedDecision::new(Decision::Affirm).with_participants(vec!["ops".into()]);
        let ruling = fixed.resolve(&ev).unwrap();
        assert_eq!(ruling.decision, Decision::Affirm);
        assert_eq!(ruling.participants, vec!["ops".to_string()]);
    }
}
