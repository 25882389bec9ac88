//! Configuration module
//!
//! `GuardConfig` is assembled once (defaults or environment), validated,
//! and then treated as immutable. Runtime-adjustable values (thresholds,
//! temperature) are owned by the classifier's threshold state instead.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use super::error::{GuardError, GuardResult};
use super::model::ThresholdConfig;

// ============================================================================
// RUN MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Development,
    Production,
}

impl RunMode {
    /// Unknown names are rejected so a typo cannot start a weaker mode
    fn parse(raw: &str) -> GuardResult<Self> {
        match raw.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(RunMode::Development),
            "prod" | "production" => Ok(RunMode::Production),
            other => Err(GuardError::config(format!(
                "{}: unknown run mode '{}' (development|production)",
                var("MODE"),
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Development => "development",
            RunMode::Production => "production",
        }
    }
}

// ============================================================================
// SIGNING KEY
// ============================================================================

/// HMAC key material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_development_key(&self) -> bool {
        self.0 == DEV_HMAC_KEY.as_bytes()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey(<{} bytes>)", self.0.len())
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Chain persistence + signing
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Active chain file
    pub path: PathBuf,

    /// Rotate once the active file grows beyond this
    pub max_bytes: u64,

    /// fsync after every record
    pub fsync: bool,

    /// Records kept in memory while the disk is failing
    pub backlog_max: usize,

    pub key: SigningKey,
    pub key_id: String,

    /// Extra verification keys (key_id -> key)
    pub keyring: HashMap<String, SigningKey>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            path: default_chain_path(),
            max_bytes: mb_to_bytes(DEFAULT_CHAIN_MAX_MB),
            fsync: false,
            backlog_max: DEFAULT_CHAIN_BACKLOG_MAX,
            key: SigningKey::new(DEV_HMAC_KEY.as_bytes()),
            key_id: DEFAULT_HMAC_KEY_ID.to_string(),
            keyring: HashMap::new(),
        }
    }
}

/// Debounce windows (before temperature scaling)
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    pub critical_window: Duration,
    pub vulnerable_window: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            critical_window: Duration::from_secs_f64(DEFAULT_DEBOUNCE_CRITICAL_SECS),
            vulnerable_window: Duration::from_secs_f64(DEFAULT_DEBOUNCE_VULNERABLE_SECS),
        }
    }
}

/// What to do when the resolution queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Producer waits for space
    Block,
    /// Reject the escalation, count it and record a rejecting resolution
    Drop,
}

#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub workers: usize,
    pub queue_depth: usize,
    pub queue_policy: QueuePolicy,

    /// Endpoint for the HTTP resolver (binary only)
    pub resolver_url: Option<String>,

    pub handshake_capacity: u32,

    /// `None` = bucket never refills
    pub handshake_refill: Option<Duration>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs_f64(DEFAULT_RESOLVER_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_RESOLVER_POLL_MS),
            workers: DEFAULT_RESOLVER_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            queue_policy: QueuePolicy::Block,
            resolver_url: None,
            handshake_capacity: DEFAULT_HANDSHAKE_CAPACITY,
            handshake_refill: Some(Duration::from_secs_f64(DEFAULT_HANDSHAKE_REFILL_SECS)),
        }
    }
}

/// Context key filtering (allow-list is case-insensitive)
#[derive(Debug, Clone)]
pub struct ContextPolicy {
    pub allow_keys: HashSet<String>,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            allow_keys: DEFAULT_ALLOW_CONTEXT_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl ContextPolicy {
    pub fn from_list(raw: &str) -> Self {
        Self {
            allow_keys: raw
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

/// Periodic self-tuning of the temperature
#[derive(Debug, Clone)]
pub struct SelfTuneConfig {
    /// Run after every N processed packets (0 = manual only)
    pub every: u64,

    /// Minimum history before tuning kicks in
    pub min_samples: usize,

    /// Alert fraction above which the guard cools down
    pub max_alert_ratio: f64,

    pub step: f64,
}

impl Default for SelfTuneConfig {
    fn default() -> Self {
        Self {
            every: 0,
            min_samples: 20,
            max_alert_ratio: 0.5,
            step: 0.05,
        }
    }
}

// ============================================================================
// GUARD CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub mode: RunMode,

    /// Written into every event record
    pub service_id: String,

    pub chain: ChainConfig,
    pub thresholds: ThresholdConfig,
    pub debounce: DebounceConfig,
    pub resolution: ResolutionConfig,
    pub context: ContextPolicy,
    pub self_tune: SelfTuneConfig,
    pub history_capacity: usize,

    /// Log raw signal values instead of bins
    pub forensics: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Development,
            service_id: DEFAULT_SERVICE_ID.to_string(),
            chain: ChainConfig::default(),
            thresholds: ThresholdConfig::default(),
            debounce: DebounceConfig::default(),
            resolution: ResolutionConfig::default(),
            context: ContextPolicy::default(),
            self_tune: SelfTuneConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            forensics: false,
        }
    }
}

impl GuardConfig {
    /// Development config writing its chain to `path`
    pub fn with_chain_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.chain.path = path.into();
        config
    }

    /// Load configuration from `GUARD_*` environment variables.
    ///
    /// Unknown modes and unparsable values are configuration errors,
    /// never silent fallbacks to a default.
    pub fn from_env() -> GuardResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// `from_env` over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> GuardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let mode = match env.raw("MODE") {
            Some(raw) => RunMode::parse(&raw)?,
            None => RunMode::Development,
        };

        let chain = ChainConfig {
            path: env.raw("CHAIN_PATH").map(PathBuf::from).unwrap_or(defaults.chain.path),
            max_bytes: mb_to_bytes(env.f64("CHAIN_MAX_MB", DEFAULT_CHAIN_MAX_MB)?),
            fsync: env.bool("CHAIN_FSYNC", false)?,
            backlog_max: env.parse("CHAIN_BACKLOG_MAX", DEFAULT_CHAIN_BACKLOG_MAX)?,
            key: env
                .raw("HMAC_KEY")
                .map(|k| SigningKey::new(k.into_bytes()))
                .unwrap_or(defaults.chain.key),
            key_id: env
                .raw("HMAC_KEY_ID")
                .unwrap_or_else(|| DEFAULT_HMAC_KEY_ID.to_string()),
            keyring: match env.raw("HMAC_KEYRING_JSON") {
                Some(raw) => parse_keyring(&raw)?,
                None => HashMap::new(),
            },
        };

        let thresholds = ThresholdConfig {
            hi: env.f64("THRESHOLD_HI", DEFAULT_THRESHOLD_HI)?,
            lo: env.f64("THRESHOLD_LO", DEFAULT_THRESHOLD_LO)?,
            vulnerable_margin: env.f64("VULNERABLE_MARGIN", DEFAULT_VULNERABLE_MARGIN)?,
            sensitivity: env.f64("SENSITIVITY", DEFAULT_SENSITIVITY)?,
        };

        let debounce = DebounceConfig {
            critical_window: env.secs("DEBOUNCE_CRITICAL_SECS", defaults.debounce.critical_window)?,
            vulnerable_window: env.secs("DEBOUNCE_VULNERABLE_SECS", defaults.debounce.vulnerable_window)?,
        };

        // 0 disables refill
        let refill_secs = env.f64("HANDSHAKE_REFILL_SECS", DEFAULT_HANDSHAKE_REFILL_SECS)?;
        let queue_policy = match env.raw("QUEUE_POLICY") {
            None => QueuePolicy::Block,
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "block" => QueuePolicy::Block,
                "drop" => QueuePolicy::Drop,
                other => {
                    return Err(GuardError::config(format!(
                        "{}: unknown queue policy '{}' (block|drop)",
                        var("QUEUE_POLICY"),
                        other
                    )));
                }
            },
        };
        let resolution = ResolutionConfig {
            timeout: env.secs("RESOLVER_TIMEOUT_SECS", defaults.resolution.timeout)?,
            poll_interval: Duration::from_millis(env.parse("RESOLVER_POLL_MS", DEFAULT_RESOLVER_POLL_MS)?),
            workers: env.parse("RESOLVER_WORKERS", DEFAULT_RESOLVER_WORKERS)?,
            queue_depth: env.parse("QUEUE_DEPTH", DEFAULT_QUEUE_DEPTH)?,
            queue_policy,
            resolver_url: env.raw("RESOLVER_URL"),
            handshake_capacity: env.parse("HANDSHAKE_CAPACITY", DEFAULT_HANDSHAKE_CAPACITY)?,
            handshake_refill: if refill_secs > 0.0 {
                Some(to_duration("HANDSHAKE_REFILL_SECS", refill_secs)?)
            } else {
                None
            },
        };

        let context = env
            .raw("ALLOW_CONTEXT_KEYS")
            .map(|raw| ContextPolicy::from_list(&raw))
            .unwrap_or_default();

        let self_tune = SelfTuneConfig {
            every: env.parse("SELF_TUNE_EVERY", 0)?,
            ..SelfTuneConfig::default()
        };

        Ok(Self {
            mode,
            service_id: env.raw("SERVICE_ID").unwrap_or(defaults.service_id),
            chain,
            thresholds,
            debounce,
            resolution,
            context,
            self_tune,
            history_capacity: env.parse("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?,
            forensics: env.bool("FORENSICS", false)?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.mode == RunMode::Production
    }

    /// Startup validation. Any error here is fatal.
    pub fn validate(&self) -> GuardResult<()> {
        if self.is_production() {
            if self.chain.key.is_development_key() {
                return Err(GuardError::config(
                    "production mode refuses the built-in development signing key",
                ));
            }
            if self.chain.key.len() < MIN_PRODUCTION_KEY_LEN {
                return Err(GuardError::config(format!(
                    "signing key too short: {} bytes, production requires >= {}",
                    self.chain.key.len(),
                    MIN_PRODUCTION_KEY_LEN
                )));
            }
        }
        if self.chain.key.is_empty() {
            return Err(GuardError::config("signing key is empty"));
        }
        if self.chain.key_id.trim().is_empty() {
            return Err(GuardError::config("signing key id is empty"));
        }
        if self.chain.max_bytes == 0 {
            return Err(GuardError::config("chain max size must be positive"));
        }
        if self.chain.backlog_max == 0 {
            return Err(GuardError::config("chain backlog must hold at least one record"));
        }

        self.thresholds
            .validate()
            .map_err(|e| GuardError::config(e.to_string()))?;

        if self.debounce.critical_window.is_zero() || self.debounce.vulnerable_window.is_zero() {
            return Err(GuardError::config("debounce windows must be positive"));
        }

        let res = &self.resolution;
        if res.timeout.is_zero() {
            return Err(GuardError::config("resolver timeout must be positive"));
        }
        if res.poll_interval.is_zero() {
            return Err(GuardError::config("resolver poll interval must be positive"));
        }
        if res.workers == 0 {
            return Err(GuardError::config("at least one resolver worker is required"));
        }
        if res.queue_depth == 0 {
            return Err(GuardError::config("resolution queue depth must be positive"));
        }

        if self.history_capacity == 0 {
            return Err(GuardError::config("history capacity must be positive"));
        }
        let tune = &self.self_tune;
        if !(tune.step.is_finite() && tune.step > 0.0 && tune.step <= 1.0) {
            return Err(GuardError::config("self-tune step must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&tune.max_alert_ratio) {
            return Err(GuardError::config("self-tune alert ratio must be in [0, 1]"));
        }

        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn default_chain_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ternary-guard")
        .join(DEFAULT_CHAIN_FILE)
}

fn mb_to_bytes(mb: f64) -> u64 {
    if mb.is_finite() && mb > 0.0 {
        (mb * 1024.0 * 1024.0) as u64
    } else {
        0
    }
}

fn var(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

/// Typed access to `GUARD_*` variables. Blank values count as unset.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&var(name)).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> GuardResult<T>
    where
        T: std::str::FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e| {
                GuardError::config(format!("{}={:?}: {}", var(name), raw, e))
            }),
        }
    }

    fn f64(&self, name: &str, default: f64) -> GuardResult<f64> {
        let value: f64 = self.parse(name, default)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(GuardError::config(format!("{} must be a finite number", var(name))))
        }
    }

    fn bool(&self, name: &str, default: bool) -> GuardResult<bool> {
        match self.raw(name) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(GuardError::config(format!("{}={:?} is not a boolean", var(name), raw))),
            },
        }
    }

    fn secs(&self, name: &str, default: Duration) -> GuardResult<Duration> {
        let secs = self.f64(name, default.as_secs_f64())?;
        if secs <= 0.0 {
            return Err(GuardError::config(format!("{} must be positive", var(name))));
        }
        to_duration(name, secs)
    }
}

fn to_duration(name: &str, secs: f64) -> GuardResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| GuardError::config(format!("{}: {}", var(name), e)))
}

/// `{"key_id": "secret", ...}`
fn parse_keyring(raw: &str) -> GuardResult<HashMap<String, SigningKey>> {
    let map = serde_json::from_str::<HashMap<String, String>>(raw)
        .map_err(|e| GuardError::config(format!("malformed {}: {}", var("HMAC_KEYRING_JSON"), e)))?;
    Ok(map
        .into_iter()
        .map(|(id, key)| (id, SigningKey::new(key.into_bytes())))
        .collect())
}
