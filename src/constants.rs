//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! `GuardConfig::from_env` falls back to these values.

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Ternary Guard";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "GUARD_";

// ============================================
// Chain
// ============================================

/// Default chain file name (inside the data directory)
pub const DEFAULT_CHAIN_FILE: &str = "guard_chain.jsonl";

/// Default rotation size (MB)
pub const DEFAULT_CHAIN_MAX_MB: f64 = 128.0;

/// Digested-but-unwritten records kept before appends are refused
pub const DEFAULT_CHAIN_BACKLOG_MAX: usize = 1024;

/// Development signing key. Refused in production mode.
pub const DEV_HMAC_KEY: &str = "dev-only-insecure";

/// Default key id stamped into every payload
pub const DEFAULT_HMAC_KEY_ID: &str = "dev";

/// Minimum signing key length in production (bytes)
pub const MIN_PRODUCTION_KEY_LEN: usize = 16;

/// Payload schema version
pub const CHAIN_SCHEMA_VERSION: &str = "v1";

/// Suffix of archived chain files
pub const ROTATED_SUFFIX: &str = "rotated";

// ============================================
// Classification
// ============================================

pub const DEFAULT_THRESHOLD_HI: f64 = 0.75;
pub const DEFAULT_THRESHOLD_LO: f64 = 0.65;
pub const DEFAULT_VULNERABLE_MARGIN: f64 = 0.10;

/// Threshold shift per unit of temperature
pub const DEFAULT_SENSITIVITY: f64 = 0.10;

/// Minimum gap kept between lo and hi
pub const THRESHOLD_EPSILON: f64 = 0.01;

/// Signals are clamped to this range before scoring
pub const SIGNAL_MIN: f64 = 0.0;
pub const SIGNAL_MAX: f64 = 5.0;

// ============================================
// Debounce
// ============================================

pub const DEFAULT_DEBOUNCE_CRITICAL_SECS: f64 = 5.0;
pub const DEFAULT_DEBOUNCE_VULNERABLE_SECS: f64 = 5.0;

/// Temperature coefficient of the debounce window (1 + k*t)
pub const DEBOUNCE_TEMPERATURE_K: f64 = 0.4;

/// Debounce windows never shrink below this (seconds)
pub const MIN_DEBOUNCE_SECS: f64 = 0.05;

// ============================================
// Resolution
// ============================================

pub const DEFAULT_RESOLVER_TIMEOUT_SECS: f64 = 30.0;
pub const DEFAULT_RESOLVER_POLL_MS: u64 = 1_000;
pub const DEFAULT_RESOLVER_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;
pub const DEFAULT_HANDSHAKE_CAPACITY: u32 = 5;
pub const DEFAULT_HANDSHAKE_REFILL_SECS: f64 = 60.0;

/// HTTP resolver request timeout (seconds)
pub const HTTP_RESOLVER_TIMEOUT_SECS: u64 = 5;

// ============================================
// Ingress / telemetry
// ============================================

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// `service_id` on event records when none is configured
pub const DEFAULT_SERVICE_ID: &str = "ternary-guard";

/// Context keys accepted when no allow-list is configured
pub const DEFAULT_ALLOW_CONTEXT_KEYS: &[&str] = &["source", "reason", "service", "region", "stage"];

/// Context keys that are never recorded, whatever the allow-list says
pub const DENY_CONTEXT_KEYS: &[&str] = &[
    "ip", "email", "mail", "token", "auth", "password", "secret",
    "session", "cookie", "user", "username", "api_key",
];

/// Substrings that disqualify a context key
pub const DENY_CONTEXT_SUBSTRINGS: &[&str] = &[
    "ip", "mail", "auth", "token", "user", "session", "cookie", "pass", "secret",
];

/// Maximum length of a recorded context string
pub const MAX_CONTEXT_VALUE_LEN: usize = 256;

/// Length of the chain head prefix shown in logs and metrics
pub const HEAD_PREFIX_LEN: usize = 16;
