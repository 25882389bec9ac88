//! Keyed digests (HMAC-SHA256) over `(prev, payload)`
//!
//! The digest input is the canonical JSON of `{"payload": .., "prev": ..}`:
//! object keys sorted, no whitespace. Canonicalisation is done here rather
//! than relying on serde_json's map ordering.

use std::collections::HashMap;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::constants::CHAIN_SCHEMA_VERSION;
use crate::logic::config::{ChainConfig, SigningKey};
use crate::logic::error::{GuardError, GuardResult};

type HmacSha256 = Hmac<Sha256>;

pub const HMAC_ALG: &str = "HMAC-SHA256";

/// hex(HMAC(key, canonical({prev, payload})))
pub fn keyed_digest(key: &[u8], prev: Option<&str>, payload: &Value) -> GuardResult<String> {
    let mut body = serde_json::Map::new();
    body.insert("payload".to_string(), payload.clone());
    body.insert(
        "prev".to_string(),
        prev.map(|p| Value::String(p.to_string())).unwrap_or(Value::Null),
    );
    let canonical = canonical_json(&Value::Object(body));

    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(key)
        .map_err(|e| GuardError::Digest(format!("HMAC key rejected: {}", e)))?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sorted-key, compact JSON
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Constant-time string comparison
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

// ============================================================================
// SIGNER
// ============================================================================

/// Signs new records with the active key
#[derive(Debug, Clone)]
pub struct ChainSigner {
    key: SigningKey,
    key_id: String,
}

impl ChainSigner {
    pub fn new(key: SigningKey, key_id: impl Into<String>) -> Self {
        Self { key, key_id: key_id.into() }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Adds `schema_version` and `hmac` metadata unless already present.
    /// Non-object payloads are wrapped as `{"value": ..}`.
    pub fn stamp(&self, payload: Value) -> Value {
        let mut map = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        map.entry("schema_version")
            .or_insert_with(|| Value::String(CHAIN_SCHEMA_VERSION.to_string()));
        map.entry("hmac").or_insert_with(|| {
            serde_json::json!({ "alg": HMAC_ALG, "key_id": self.key_id })
        });
        Value::Object(map)
    }

    pub fn digest(&self, prev: Option<&str>, payload: &Value) -> GuardResult<String> {
        keyed_digest(self.key.as_bytes(), prev, payload)
    }
}

// ============================================================================
// KEYRING
// ============================================================================

/// Verification keys, selected by the payload's `hmac.key_id`
#[derive(Debug, Clone)]
pub struct Keyring {
    default_id: String,
    default_key: SigningKey,
    keys: HashMap<String, SigningKey>,
}

impl Keyring {
    pub fn new(default_id: impl Into<String>, default_key: SigningKey) -> Self {
        Self {
            default_id: default_id.into(),
            default_key,
            keys: HashMap::new(),
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        let mut ring = Self::new(config.key_id.clone(), config.key.clone());
        for (id, key) in &config.keyring {
            ring.insert(id.clone(), key.clone());
        }
        ring
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: SigningKey) {
        self.keys.insert(key_id.into(), key);
    }

    /// Unknown ids fall back to the default key
    pub fn key_for(&self, payload: &Value) -> &SigningKey {
        let key_id = payload
            .get("hmac")
            .and_then(|h| h.get("key_id"))
            .and_then(|k| k.as_str());

        match key_id {
            Some(id) if id == self.default_id => &self.default_key,
            Some(id) => self.keys.get(id).unwrap_or(&self.default_key),
            None => &self.default_key,
        }
    }

    /// Key id named by the payload when the ring does not hold it
    pub fn unknown_key_id<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        payload
            .get("hmac")
            .and_then(|h| h.get("key_id"))
            .and_then(|k| k.as_str())
            .filter(|id| *id != self.default_id && !self.keys.contains_key(*id))
    }

    pub fn digest_for(&self, prev: Option<&str>, payload: &Value) -> GuardResult<String> {
        keyed_digest(self.key_for(payload).as_bytes(), prev, payload)
    }
}
