//! Domain types for the agent message broker
//!
//! Strongly-typed, validated scalars for broker configuration and message
//! metadata, following the newtype-via-`nutype` convention used throughout
//! this crate to make illegal values unrepresentable.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable, opaque identifier for an agent.
///
/// Unlike a routing-layer identifier generated by the broker, an `AgentId`
/// is supplied by the agent itself at registration time (it may be a
/// human-chosen slug such as `"legal-agent-1"`), so it is a validated
/// string rather than a UUID.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        AsRef
    )
)]
pub struct AgentId(String);

/// Category tag for an agent, e.g. `"legal"`, `"environmental"`.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 100),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom)
)]
pub struct AgentType(String);

/// Human-readable agent name.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom)
)]
pub struct AgentName(String);

/// A single capability tag advertised by an agent.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 100),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom)
)]
pub struct Capability(String);

/// Opaque pub/sub topic name.
#[nutype(
    sanitize(trim),
    validate(len_char_min = 1, len_char_max = 255),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom)
)]
pub struct Topic(String);

/// Unique identifier for a message, also used as the correlation id linking
/// a REQUEST to its RESPONSE.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new, globally-unique message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Wall-clock timestamp recorded at message creation, stored as seconds
/// since the Unix epoch so TTL arithmetic stays a plain integer subtraction.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Into
))]
pub struct MessageTimestamp(u64);

impl MessageTimestamp {
    /// Captures the current time.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self::new(secs)
    }

    /// Seconds elapsed between `self` and `other`, saturating at zero if
    /// `other` is earlier than `self`.
    #[must_use]
    pub fn elapsed_since(&self, other: Self) -> u64 {
        self.into_inner().saturating_sub(other.into_inner())
    }
}

/// Time-to-live for a message, in seconds.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 300
)]
pub struct TtlSeconds(u64);

/// Mutable count of delivery retries attempted for a message.
#[nutype(
    validate(less_or_equal = 255),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    )
)]
pub struct RetryCount(u8);

impl RetryCount {
    /// Returns a copy incremented by one.
    ///
    /// # Panics
    /// Panics only if the count is already at `u8::MAX`, which would require
    /// far more retries than `retry_max_attempts` ever permits in practice.
    #[must_use]
    pub fn incremented(self) -> Self {
        Self::try_new(self.into_inner() + 1).unwrap_or(self)
    }
}

/// Bounded capacity of the priority intake queue.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 5000
)]
pub struct QueueCapacity(usize);

impl QueueCapacity {
    /// Value as `usize`, as consumed by queue/semaphore APIs.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Number of workers in the dispatch pool.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 64),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct WorkerCount(usize);

impl WorkerCount {
    /// Value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum number of messages a worker drains into one batch.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 10
)]
pub struct BatchSize(usize);

impl BatchSize {
    /// Value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum wait, after the first message, before a partial batch is
/// dispatched anyway.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 50
)]
pub struct BatchTimeoutMs(u64);

impl BatchTimeoutMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Maximum retries applied to a failed HIGH/CRITICAL delivery.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 20),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 3
)]
pub struct RetryMaxAttempts(u8);

impl RetryMaxAttempts {
    /// Value as `u8`.
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.into_inner()
    }
}

/// Staleness threshold for a worker's heartbeat before the pool restarts it.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct HeartbeatStaleMs(u64);

impl HeartbeatStaleMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Drain window granted to workers on graceful shutdown.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 120_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 5_000
)]
pub struct ShutdownGraceMs(u64);

impl ShutdownGraceMs {
    /// Converts to a `Duration`.
    #[must_use]
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.into_inner())
    }
}

/// Number of dead-letter entries retained before the oldest is evicted.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Default,
        TryFrom,
        Into
    ),
    default = 1_000
)]
pub struct DeadLetterCapacity(usize);

impl DeadLetterCapacity {
    /// Value as `usize`.
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Numeric worker identity, assigned sequentially at pool start.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    Into
))]
pub struct WorkerId(usize);

impl WorkerId {
    /// Wraps a zero-based pool index.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self::new(index)
    }
}
