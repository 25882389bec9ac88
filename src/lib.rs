//! Ternary Guard - Core Library
//!
//! Streaming signal classification with debounce, asynchronous escalation
//! and a keyed, rotation-aware audit chain.
//!
//! ```text
//! packet ─► classifier ─► debounce gate ─► chain store
//!                                   └─► resolution workflow ─► chain store
//! ```

pub mod constants;
pub mod logic;

pub use logic::chain::{verify_chain, ChainStore, ChainVerification, Keyring};
pub use logic::config::{GuardConfig, RunMode};
pub use logic::error::{GuardError, GuardResult};
pub use logic::pipeline::{GuardPipeline, Packet};
pub use logic::resolution::{Decision, Resolver};
pub use logic::telemetry::GuardMetrics;
pub use logic::threat::GuardState;
