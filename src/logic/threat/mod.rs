//! Threat Module
//!
//! - `types.rs` - GuardState, classification output, event record
//! - `classifier.rs` - pluggable scorer and state mapping

pub mod types;
pub mod classifier;

pub use types::{Classification, Event, GuardState};
pub use classifier::{Classifier, LogisticScorer, Scorer};
