//! Model Module
//!
//! Threshold state behind the classifier.

pub mod threshold;

pub use threshold::{
    next_temperature, AdaptiveThresholds, ThresholdConfig, ThresholdSnapshot, TuningStep,
};
