//! Statistics and monitoring (C8): the exact counter names the original
//! `agent_message_broker.py::get_stats` tracks (§2.2), plus the snapshot
//! fields §4.8 adds on top.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::config::BrokerConfig;
use super::domain_types::WorkerId;

/// Atomically-updated counters, one instance shared across the broker.
#[derive(Default)]
pub struct StatsCounters {
    messages_sent: AtomicU64,
    messages_delivered: AtomicU64,
    messages_failed: AtomicU64,
    messages_expired: AtomicU64,
    messages_retried: AtomicU64,
    batches_processed: AtomicU64,
    batch_size_total: AtomicU64,
}

impl StatsCounters {
    /// Builds a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps `messages_sent` by one.
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps `messages_delivered` by one per successful recipient.
    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps `messages_failed` by one.
    pub fn record_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps `messages_expired` by one.
    pub fn record_expired(&self) {
        self.messages_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps `messages_retried` by one.
    pub fn record_retried(&self) {
        self.messages_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one processed batch of the given size, for `avg_batch_size`.
    pub fn record_batch(&self, size: usize) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.batch_size_total.fetch_add(size as u64, Ordering::Relaxed);
    }

    fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_processed.load(Ordering::Relaxed);
        if batches == 0 {
            0.0
        } else {
            self.batch_size_total.load(Ordering::Relaxed) as f64 / batches as f64
        }
    }
}

/// Per-worker snapshot (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    /// Pool-assigned worker id.
    pub worker_id: WorkerId,
    /// Whether the worker's loop is currently running.
    pub running: bool,
    /// Messages the worker has processed since start.
    pub messages_processed: u64,
    /// Handler errors the worker has observed.
    pub errors: u64,
    /// Seconds since the worker's last heartbeat.
    pub last_heartbeat_age_seconds: u64,
}

/// The subset of configuration worth printing alongside a stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    /// Worker pool size.
    pub num_workers: usize,
    /// Whether batching is enabled.
    pub enable_batching: bool,
    /// Configured batch size.
    pub batch_size: usize,
    /// Configured batch timeout, milliseconds.
    pub batch_timeout_ms: u64,
    /// Configured queue capacity.
    pub max_queue_size: usize,
    /// Whether a message's recipients fan out concurrently.
    pub delivery_parallelism: bool,
}

impl From<&BrokerConfig> for ConfigSummary {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            num_workers: config.num_workers.as_usize(),
            enable_batching: config.enable_batching,
            batch_size: config.batch_size.as_usize(),
            batch_timeout_ms: config.batch_timeout_ms.into_inner(),
            max_queue_size: config.max_queue_size.as_usize(),
            delivery_parallelism: config.delivery_parallelism,
        }
    }
}

/// A full point-in-time statistics snapshot (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Total messages submitted via `send_message`/`send_request`/etc.
    pub messages_sent: u64,
    /// Total successful per-recipient deliveries.
    pub messages_delivered: u64,
    /// Total deliveries that exhausted retries or hit a handler error with
    /// no retry eligibility.
    pub messages_failed: u64,
    /// Total messages dead-lettered for having expired before dispatch.
    pub messages_expired: u64,
    /// Total retry attempts performed.
    pub messages_retried: u64,
    /// Total `send_request` calls that timed out waiting for a response.
    pub requests_timeout: u64,
    /// Total subscriber-topic pairs currently held.
    pub subscriptions_active: usize,
    /// Total distinct topics with at least one subscriber.
    pub topic_count: usize,
    /// Total currently registered agents.
    pub agents_registered: usize,
    /// Unix timestamp (seconds) the broker started at.
    pub broker_start_time: u64,
    /// Seconds since the broker started.
    pub broker_uptime_seconds: u64,
    /// Total batches processed across all workers.
    pub batches_processed: u64,
    /// Mean batch size across all processed batches.
    pub avg_batch_size: f64,
    /// Current queue depth.
    pub queue_size: usize,
    /// `queue_size / max_queue_size`.
    pub queue_utilization: f64,
    /// Requests currently awaiting a correlated response.
    pub pending_requests: usize,
    /// Current dead-letter buffer size.
    pub dead_letter_size: usize,
    /// Per-worker health snapshots.
    pub worker_stats: Vec<WorkerSnapshot>,
    /// The handful of config values worth printing alongside stats.
    pub config_summary: ConfigSummary,
}

#[allow(clippy::too_many_arguments)]
impl BrokerStats {
    /// Assembles a snapshot from the broker's live counters and component
    /// state. Called under a single read, per §4.8.
    pub fn snapshot(
        counters: &StatsCounters,
        subscriptions_active: usize,
        agents_registered: usize,
        broker_start_time: u64,
        now: u64,
        queue_size: usize,
        max_queue_size: usize,
        pending_requests: usize,
        requests_timeout: u64,
        dead_letter_size: usize,
        topic_count: usize,
        worker_stats: Vec<WorkerSnapshot>,
        config_summary: ConfigSummary,
    ) -> Self {
        Self {
            messages_sent: counters.messages_sent.load(Ordering::Relaxed),
            messages_delivered: counters.messages_delivered.load(Ordering::Relaxed),
            messages_failed: counters.messages_failed.load(Ordering::Relaxed),
            messages_expired: counters.messages_expired.load(Ordering::Relaxed),
            messages_retried: counters.messages_retried.load(Ordering::Relaxed),
            requests_timeout,
            subscriptions_active,
            agents_registered,
            broker_start_time,
            broker_uptime_seconds: now.saturating_sub(broker_start_time),
            batches_processed: counters.batches_processed.load(Ordering::Relaxed),
            avg_batch_size: counters.avg_batch_size(),
            queue_size,
            queue_utilization: if max_queue_size == 0 {
                0.0
            } else {
                queue_size as f64 / max_queue_size as f64
            },
            pending_requests,
            dead_letter_size,
            topic_count,
            worker_stats,
            config_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_batch_size_is_zero_with_no_batches() {
        let counters = StatsCounters::new();
        assert_eq!(counters.avg_batch_size(), 0.0);
    }

    #[test]
    fn avg_batch_size_tracks_recorded_batches() {
        let counters = StatsCounters::new();
        counters.record_batch(10);
        counters.record_batch(20);
        assert_eq!(counters.avg_batch_size(), 15.0);
    }

    #[test]
    fn queue_utilization_is_ratio_of_size_to_capacity() {
        let counters = StatsCounters::new();
        let snapshot = BrokerStats::snapshot(
            &counters,
            0,
            0,
            0,
            100,
            25,
            100,
            0,
            0,
            0,
            0,
            vec![],
            ConfigSummary::from(&BrokerConfig::testing()),
        );
        assert_eq!(snapshot.queue_utilization, 0.25);
        assert_eq!(snapshot.broker_uptime_seconds, 100);
    }
}
