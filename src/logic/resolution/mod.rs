//! Resolution Module - asynchronous escalation
//!
//! ## Structure
//! - `types.rs` - Decision, Ruling, Resolution and Handshake records
//! - `resolver.rs` - Resolver capability + built-in resolvers
//! - `budget.rs` - handshake token bucket
//! - `actuator.rs` - side effects of AFFIRM (log, quarantine ledger)
//! - `workflow.rs` - bounded queue + worker pool + poll loop

pub mod types;
pub mod resolver;
pub mod budget;
pub mod actuator;
pub mod workflow;

pub use types::{Decision, Handshake, Resolution, Ruling};
pub use resolver::{AlwaysPending, DemoResolver, FixedDecision, HttpResolver, Resolver, ResolverError};
pub use budget::TokenBucket;
pub use actuator::{Actuator, LogActuator, QuarantineEntry, QuarantineLedger};
pub use workflow::{ResolutionWorkflow, Submission, QUEUE_FULL_SOURCE};
