//! Broker configuration: a validated struct, a fluent builder, named
//! environment factories, and JSON file round-tripping — the exact shape
//! `message_router/config.rs` uses for `RouterConfig`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::domain_types::{
    BatchSize, BatchTimeoutMs, DeadLetterCapacity, HeartbeatStaleMs, QueueCapacity,
    RetryMaxAttempts, ShutdownGraceMs, WorkerCount,
};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value is inconsistent with another field or out of a
    /// reasonable range that the type system alone cannot express.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Offending field name.
        field: String,
        /// Why the value is rejected.
        reason: String,
    },

    /// Reading/writing a configuration file failed.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialisation of a configuration file failed.
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// Complete broker configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Number of concurrent dispatch workers.
    pub num_workers: WorkerCount,
    /// Whether workers may batch dequeues before dispatching.
    pub enable_batching: bool,
    /// Maximum items per batch.
    pub batch_size: BatchSize,
    /// Maximum wait after the first item before a partial batch dispatches.
    pub batch_timeout_ms: BatchTimeoutMs,
    /// Bounded intake capacity of the priority queue.
    pub max_queue_size: QueueCapacity,
    /// Maximum retries per failed HIGH/CRITICAL delivery.
    pub retry_max_attempts: RetryMaxAttempts,
    /// Whether a single message's recipients fan out concurrently.
    pub delivery_parallelism: bool,
    /// Worker restart threshold for a stale heartbeat.
    pub heartbeat_stale_ms: HeartbeatStaleMs,
    /// Drain window granted to workers on `stop`.
    pub shutdown_grace_ms: ShutdownGraceMs,
    /// Retained dead-letter entry count.
    pub dead_letter_capacity: DeadLetterCapacity,
}

impl BrokerConfig {
    /// Development defaults: small queues, fast feedback, no batching.
    ///
    /// # Panics
    /// Panics only if a hardcoded literal below falls outside its domain
    /// type's validated range, which would itself be a bug in this function.
    #[must_use]
    pub fn development() -> Self {
        Self {
            num_workers: WorkerCount::try_new(2).unwrap(),
            enable_batching: false,
            batch_size: BatchSize::try_new(5).unwrap(),
            batch_timeout_ms: BatchTimeoutMs::try_new(25).unwrap(),
            max_queue_size: QueueCapacity::try_new(500).unwrap(),
            retry_max_attempts: RetryMaxAttempts::try_new(2).unwrap(),
            delivery_parallelism: false,
            heartbeat_stale_ms: HeartbeatStaleMs::try_new(5_000).unwrap(),
            shutdown_grace_ms: ShutdownGraceMs::try_new(1_000).unwrap(),
            dead_letter_capacity: DeadLetterCapacity::try_new(1_000).unwrap(),
        }
    }

    /// Production defaults: larger queues, batching enabled, more workers.
    ///
    /// # Panics
    /// Panics only if a hardcoded literal below falls outside its domain
    /// type's validated range, which would itself be a bug in this function.
    #[must_use]
    pub fn production() -> Self {
        Self {
            num_workers: WorkerCount::try_new(8).unwrap(),
            enable_batching: true,
            batch_size: BatchSize::try_new(100).unwrap(),
            batch_timeout_ms: BatchTimeoutMs::try_new(50).unwrap(),
            max_queue_size: QueueCapacity::try_new(50_000).unwrap(),
            retry_max_attempts: RetryMaxAttempts::try_new(3).unwrap(),
            delivery_parallelism: true,
            heartbeat_stale_ms: HeartbeatStaleMs::try_new(30_000).unwrap(),
            shutdown_grace_ms: ShutdownGraceMs::try_new(10_000).unwrap(),
            dead_letter_capacity: DeadLetterCapacity::try_new(100_000).unwrap(),
        }
    }

    /// Minimal-resource defaults for fast, deterministic test runs.
    ///
    /// # Panics
    /// Panics only if a hardcoded literal below falls outside its domain
    /// type's validated range, which would itself be a bug in this function.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            num_workers: WorkerCount::try_new(1).unwrap(),
            enable_batching: false,
            batch_size: BatchSize::try_new(1).unwrap(),
            batch_timeout_ms: BatchTimeoutMs::try_new(10).unwrap(),
            max_queue_size: QueueCapacity::try_new(50).unwrap(),
            retry_max_attempts: RetryMaxAttempts::try_new(1).unwrap(),
            delivery_parallelism: false,
            heartbeat_stale_ms: HeartbeatStaleMs::try_new(1_000).unwrap(),
            shutdown_grace_ms: ShutdownGraceMs::try_new(200).unwrap(),
            dead_letter_capacity: DeadLetterCapacity::try_new(100).unwrap(),
        }
    }

    /// Starts a fluent builder seeded with development defaults.
    #[must_use]
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }

    /// Cross-field consistency checks that the domain types alone cannot
    /// express.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] describing the first
    /// inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size.as_usize() > self.max_queue_size.as_usize() {
            return Err(ConfigError::Validation {
                field: "batch_size".to_string(),
                reason: "must not exceed max_queue_size".to_string(),
            });
        }

        if self.num_workers.as_usize() > num_cpus::get() * 4 {
            return Err(ConfigError::Validation {
                field: "num_workers".to_string(),
                reason: format!("should not exceed 4x CPU cores ({})", num_cpus::get() * 4),
            });
        }

        if self.enable_batching && self.batch_size.as_usize() < 1 {
            return Err(ConfigError::Validation {
                field: "batch_size".to_string(),
                reason: "must be at least 1 when batching is enabled".to_string(),
            });
        }

        Ok(())
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] or [`ConfigError::Serialization`] on
    /// failure.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`], [`ConfigError::Serialization`], or
    /// [`ConfigError::Validation`] on failure.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Layers legacy positional overrides on top of a base configuration
    /// (defaulting to [`Self::development`]), matching the original's
    /// `__init__(config=None, max_queue_size=None, max_retry=None)` (§6).
    #[must_use]
    pub fn from_legacy(
        config: Option<Self>,
        max_queue_size: Option<QueueCapacity>,
        max_retry: Option<RetryMaxAttempts>,
    ) -> Self {
        let mut config = config.unwrap_or_default();
        if let Some(size) = max_queue_size {
            config.max_queue_size = size;
        }
        if let Some(retries) = max_retry {
            config.retry_max_attempts = retries;
        }
        config
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Fluent builder for a custom [`BrokerConfig`].
pub struct BrokerConfigBuilder {
    config: BrokerConfig,
}

impl BrokerConfigBuilder {
    /// Starts from development defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::development(),
        }
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn num_workers(mut self, count: WorkerCount) -> Self {
        self.config.num_workers = count;
        self
    }

    /// Enables or disables batching.
    #[must_use]
    pub fn enable_batching(mut self, enable: bool) -> Self {
        self.config.enable_batching = enable;
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub fn batch_size(mut self, size: BatchSize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Sets the batch wait timeout.
    #[must_use]
    pub fn batch_timeout_ms(mut self, timeout: BatchTimeoutMs) -> Self {
        self.config.batch_timeout_ms = timeout;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn max_queue_size(mut self, size: QueueCapacity) -> Self {
        self.config.max_queue_size = size;
        self
    }

    /// Sets the maximum retry attempts for HIGH/CRITICAL deliveries.
    #[must_use]
    pub fn retry_max_attempts(mut self, retries: RetryMaxAttempts) -> Self {
        self.config.retry_max_attempts = retries;
        self
    }

    /// Enables or disables concurrent fan-out to a single message's
    /// recipients.
    #[must_use]
    pub fn delivery_parallelism(mut self, enable: bool) -> Self {
        self.config.delivery_parallelism = enable;
        self
    }

    /// Sets the worker heartbeat staleness threshold.
    #[must_use]
    pub fn heartbeat_stale_ms(mut self, threshold: HeartbeatStaleMs) -> Self {
        self.config.heartbeat_stale_ms = threshold;
        self
    }

    /// Sets the shutdown drain window.
    #[must_use]
    pub fn shutdown_grace_ms(mut self, grace: ShutdownGraceMs) -> Self {
        self.config.shutdown_grace_ms = grace;
        self
    }

    /// Sets the dead-letter retention capacity.
    #[must_use]
    pub fn dead_letter_capacity(mut self, capacity: DeadLetterCapacity) -> Self {
        self.config.dead_letter_capacity = capacity;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError::Validation`] if the assembled configuration is
    /// inconsistent.
    pub fn build(self) -> Result<BrokerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for BrokerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
