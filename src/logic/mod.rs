//! Logic Module - Engines behind the ingress pipeline
//!
//! ## Layout
//! - `threat/` - guard states, scorer and classifier
//! - `model/` - threshold state (hi/lo, temperature, self-tuning)
//! - `debounce` - per-state alert suppression
//! - `chain/` - keyed append-only audit chain + verifier
//! - `resolution/` - asynchronous escalation workflow
//! - `telemetry/` - counters, rolling history, metrics
//! - `pipeline/` - packet validation and the `process` entry point

pub mod config;
pub mod error;
pub mod events;

pub mod threat;
pub mod model;
pub mod debounce;
pub mod chain;
pub mod resolution;
pub mod telemetry;
pub mod pipeline;
