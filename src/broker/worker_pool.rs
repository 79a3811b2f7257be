//! Worker pool (C5): a fixed set of dispatch loops pulling from the
//! priority queue, with optional batching and heartbeat-based restart.
//!
//! No original-language source for this component survived retrieval (see
//! DESIGN.md); it is designed directly from §4.5's prose using the same
//! `tokio`/atomic idioms `message_router/router.rs` uses for its own
//! per-task spans and shutdown signalling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use super::config::BrokerConfig;
use super::delivery::DeliveryEngine;
use super::domain_types::WorkerId;
use super::queue::PriorityQueue;
use super::stats::{StatsCounters, WorkerSnapshot};

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct WorkerHandle {
    running: Arc<AtomicBool>,
    last_heartbeat: Arc<AtomicU64>,
    messages_processed: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

fn spawn_worker_task(
    worker_id: WorkerId,
    queue: Arc<PriorityQueue>,
    delivery: Arc<DeliveryEngine>,
    config: Arc<BrokerConfig>,
    stats: Arc<StatsCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> WorkerHandle {
    let running = Arc::new(AtomicBool::new(true));
    let last_heartbeat = Arc::new(AtomicU64::new(now_secs()));
    let messages_processed = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    let running_task = running.clone();
    let last_heartbeat_task = last_heartbeat.clone();
    let messages_processed_task = messages_processed.clone();
    let errors_task = errors.clone();

    let task = tokio::spawn(
        async move {
            loop {
                last_heartbeat_task.store(now_secs(), Ordering::Relaxed);

                let batch = if config.enable_batching {
                    queue
                        .get_batch(config.batch_size.as_usize(), config.batch_timeout_ms.as_duration())
                        .await
                } else {
                    match queue.get().await {
                        Some(message) => vec![message],
                        None => Vec::new(),
                    }
                };

                if batch.is_empty() {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }

                stats.record_batch(batch.len());

                if config.delivery_parallelism {
                    let dispatches = batch.into_iter().map(|message| delivery.dispatch(message));
                    let batch_errors: u64 = futures::future::join_all(dispatches).await.into_iter().sum();
                    errors_task.fetch_add(batch_errors, Ordering::Relaxed);
                } else {
                    for message in batch {
                        let message_errors = delivery.dispatch(message).await;
                        errors_task.fetch_add(message_errors, Ordering::Relaxed);
                    }
                }

                messages_processed_task.fetch_add(1, Ordering::Relaxed);
                last_heartbeat_task.store(now_secs(), Ordering::Relaxed);

                if *shutdown_rx.borrow() && queue.is_empty().await {
                    break;
                }
            }
            running_task.store(false, Ordering::Release);
        }
        .instrument(info_span!("broker_worker", worker_id = %worker_id)),
    );

    WorkerHandle {
        running,
        last_heartbeat,
        messages_processed,
        errors,
        task,
    }
}

/// Fixed-size pool of dispatch workers (§4.5).
pub struct WorkerPool {
    queue: Arc<PriorityQueue>,
    delivery: Arc<DeliveryEngine>,
    config: Arc<BrokerConfig>,
    stats: Arc<StatsCounters>,
    workers: Arc<Mutex<Vec<WorkerHandle>>>,
    shutdown_tx: watch::Sender<bool>,
    health_monitor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Builds a pool that has not yet started any worker tasks.
    #[must_use]
    pub fn new(
        queue: Arc<PriorityQueue>,
        delivery: Arc<DeliveryEngine>,
        config: Arc<BrokerConfig>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            delivery,
            config,
            stats,
            workers: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
            health_monitor: Mutex::new(None),
        }
    }

    /// Spawns `num_workers` dispatch loops plus a health monitor that
    /// restarts any worker whose heartbeat goes stale.
    pub async fn start(&self) {
        {
            let mut workers = self.workers.lock().await;
            for index in 0..self.config.num_workers.as_usize() {
                workers.push(spawn_worker_task(
                    WorkerId::from_index(index),
                    self.queue.clone(),
                    self.delivery.clone(),
                    self.config.clone(),
                    self.stats.clone(),
                    self.shutdown_tx.subscribe(),
                ));
            }
        }

        let workers = self.workers.clone();
        let queue = self.queue.clone();
        let delivery = self.delivery.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let stale_after_secs = self.config.heartbeat_stale_ms.as_duration().as_secs().max(1);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();

        let monitor = tokio::spawn(async move {
            let poll_interval = std::time::Duration::from_secs(stale_after_secs).max(std::time::Duration::from_millis(100)) / 2;
            loop {
                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                restart_stale_workers(
                    &workers,
                    stale_after_secs,
                    &queue,
                    &delivery,
                    &config,
                    &stats,
                    &shutdown_tx,
                )
                .await;
            }
        });
        *self.health_monitor.lock().await = Some(monitor);
    }

    /// Restarts any worker whose heartbeat is older than
    /// `heartbeat_stale_ms`. Exposed so callers (or tests) can force an
    /// immediate check instead of waiting for the background monitor's
    /// next poll.
    pub async fn check_health(&self) {
        let stale_after_secs = self.config.heartbeat_stale_ms.as_duration().as_secs().max(1);
        restart_stale_workers(
            &self.workers,
            stale_after_secs,
            &self.queue,
            &self.delivery,
            &self.config,
            &self.stats,
            &self.shutdown_tx,
        )
        .await;
    }

    /// Signals shutdown, waits up to `shutdown_grace_ms` for workers to
    /// drain, then aborts anything still running (§4.5).
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.queue.close();

        let grace = self.config.shutdown_grace_ms.as_duration();
        let mut workers = self.workers.lock().await;
        for handle in workers.iter_mut() {
            if tokio::time::timeout(grace, &mut handle.task).await.is_err() {
                warn!("worker did not drain within shutdown grace, aborting");
                handle.task.abort();
            }
        }
        workers.clear();

        if let Some(monitor) = self.health_monitor.lock().await.take() {
            monitor.abort();
        }
        info!("worker pool stopped");
    }

    /// Per-worker health snapshots for the statistics surface (§4.8).
    pub async fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let workers = self.workers.lock().await;
        workers
            .iter()
            .enumerate()
            .map(|(index, handle)| WorkerSnapshot {
                worker_id: WorkerId::from_index(index),
                running: handle.running.load(Ordering::Relaxed),
                messages_processed: handle.messages_processed.load(Ordering::Relaxed),
                errors: handle.errors.load(Ordering::Relaxed),
                last_heartbeat_age_seconds: now_secs()
                    .saturating_sub(handle.last_heartbeat.load(Ordering::Relaxed)),
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn restart_stale_workers(
    workers: &Arc<Mutex<Vec<WorkerHandle>>>,
    stale_after_secs: u64,
    queue: &Arc<PriorityQueue>,
    delivery: &Arc<DeliveryEngine>,
    config: &Arc<BrokerConfig>,
    stats: &Arc<StatsCounters>,
    shutdown_tx: &watch::Sender<bool>,
) {
    let mut workers = workers.lock().await;
    for (index, handle) in workers.iter_mut().enumerate() {
        let age = now_secs().saturating_sub(handle.last_heartbeat.load(Ordering::Relaxed));
        if age > stale_after_secs && !handle.task.is_finished() {
            warn!(worker_id = index, age_seconds = age, "worker heartbeat stale, restarting");
            handle.task.abort();
            let messages_processed = handle.messages_processed.clone();
            let errors = handle.errors.clone();
            let mut replacement = spawn_worker_task(
                WorkerId::from_index(index),
                queue.clone(),
                delivery.clone(),
                config.clone(),
                stats.clone(),
                shutdown_tx.subscribe(),
            );
            replacement.messages_processed = messages_processed;
            replacement.errors = errors;
            *handle = replacement;
        }
    }
}
