//! Error handling

use thiserror::Error;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, Error)]
pub enum GuardError {
    // Startup errors
    #[error("configuration error: {0}")]
    Config(String),

    // Ingress errors
    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(String),

    // Chain errors
    #[error("chain I/O error: {0}")]
    ChainIo(#[from] std::io::Error),

    #[error("chain serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("chain backlog full ({0} records waiting for disk)")]
    BacklogFull(usize),

    #[error("digest error: {0}")]
    Digest(String),

    // Resolution errors
    #[error("resolution queue full")]
    QueueFull,

    #[error("resolution workflow stopped")]
    WorkflowStopped,

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl GuardError {
    pub fn config(msg: impl Into<String>) -> Self {
        GuardError::Config(msg.into())
    }

    /// Whether the error comes from chain persistence
    pub fn is_chain_error(&self) -> bool {
        matches!(
            self,
            GuardError::ChainIo(_)
                | GuardError::Serialization(_)
                | GuardError::BacklogFull(_)
                | GuardError::Digest(_)
        )
    }
}
