//! Error types for the NACK responder.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NackError>;

// ── Errors ──────────────────────────────────────────────────────────

/// Everything the responder can fail with.
///
/// Only construction and the live write path surface these to the host.
/// Retransmission failures are logged and counted instead.
#[derive(Debug, Error)]
pub enum NackError {
    /// Send buffer size is not a power of two in `1..=32768`.
    #[error("{size} is not a valid send buffer size, allowed sizes: {allowed:?}")]
    InvalidCapacity { size: usize, allowed: Vec<u16> },
    /// Retain attempted on a packet whose reference count already hit zero.
    #[error("packet already released")]
    AlreadyReleased,
    /// The packet pool refused to hand out more storage.
    #[error("packet pool exhausted ({limit} packets outstanding)")]
    PoolExhausted { limit: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for NackError {
    fn from(e: toml::de::Error) -> Self {
        NackError::Config(e.to_string())
    }
}
