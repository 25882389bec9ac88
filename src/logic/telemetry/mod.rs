//! Telemetry Module
//!
//! ## Structure
//! - `counters.rs` - atomic totals (malformed, suppressed, escalations, ...)
//! - `history.rs` - bounded rolling window of scores and states
//! - `metrics.rs` - `GuardMetrics` snapshot (p50/p95, rate, chain head)

pub mod counters;
pub mod history;
pub mod metrics;

pub use counters::{CounterSnapshot, GuardCounters};
pub use history::{HistoryEntry, RollingHistory};
pub use metrics::{nearest_rank, ChainStatus, GuardMetrics};
