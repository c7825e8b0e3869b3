//! # Responder Configuration
//!
//! Settings arrive as a partial [`ResponderConfigInput`] (from TOML or built
//! in code) and are resolved into a validated [`ResponderConfig`]. Missing
//! fields take their defaults.
//!
//! ```toml
//! buffer_size = 2048
//! workers = 4
//! queue_capacity = 512
//!
//! [pool]
//! free_list_capacity = 8192
//! max_outstanding = 65536
//! ```

use serde::Deserialize;

use crate::error::{NackError, Result};
use crate::send_buffer::{validate_capacity, DEFAULT_CAPACITY};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Raw responder settings as read from TOML. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponderConfigInput {
    pub buffer_size: Option<usize>,
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub pool: PoolConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PoolConfigInput {
    pub free_list_capacity: Option<usize>,
    pub max_outstanding: Option<usize>,
}

/// Validated responder settings.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Send buffer capacity per stream (power of two, `1..=32768`).
    pub buffer_size: u16,
    /// Threads handling loss reports.
    pub workers: usize,
    /// Loss reports allowed to wait for a worker.
    pub queue_capacity: usize,
    pub pool: crate::pool::PoolConfig,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_CAPACITY,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pool: crate::pool::PoolConfig::default(),
        }
    }
}

impl ResponderConfigInput {
    pub fn resolve(self) -> Result<ResponderConfig> {
        let defaults = ResponderConfig::default();

        let buffer_size = match self.buffer_size {
            Some(size) => validate_capacity(size)?,
            None => defaults.buffer_size,
        };
        let workers = self.workers.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(NackError::Config("workers must be at least 1".into()));
        }
        let queue_capacity = self.queue_capacity.unwrap_or(defaults.queue_capacity).max(1);

        let pool = crate::pool::PoolConfig {
            free_list_capacity: self
                .pool
                .free_list_capacity
                .unwrap_or(defaults.pool.free_list_capacity),
            max_outstanding: self.pool.max_outstanding,
        };

        Ok(ResponderConfig {
            buffer_size,
            workers,
            queue_capacity,
            pool,
        })
    }
}

impl ResponderConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let input: ResponderConfigInput = toml::from_str(toml_str)?;
        input.resolve()
    }
}
