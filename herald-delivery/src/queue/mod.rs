//! Bounded, priority-ordered dispatch queue
//!
//! Jobs are kept in descending priority order; jobs of equal priority keep
//! their insertion order. A single drain loop per queue removes up to
//! `batch_size` jobs at a time, hands each to the [`NotificationHandler`], and
//! waits `process_interval_ms` between batches whatever the outcome.
//!
//! When the handler fails with a non-terminal error, the failed job and the
//! rest of its batch go back into the queue one priority level lower.

mod handler;

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use herald_common::{internal, tracing};
use serde::{Deserialize, Serialize};
use tokio::{sync::Notify, time::Instant};

pub use handler::NotificationHandler;

use crate::{error::DeliveryError, types::NotificationJob};

/// Configuration for the dispatch queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued jobs
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Jobs removed per drain iteration
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds)
    #[serde(default = "default_process_interval_ms")]
    pub process_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            batch_size: default_batch_size(),
            process_interval_ms: default_process_interval_ms(),
        }
    }
}

impl QueueConfig {
    const fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }
}

const fn default_max_size() -> usize {
    10_000
}

const fn default_batch_size() -> usize {
    100
}

const fn default_process_interval_ms() -> u64 {
    1000
}

#[derive(Debug)]
struct Entry {
    job: NotificationJob,
    priority: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    /// Owned by the running loop: set when it is spawned, cleared as it exits
    draining: bool,
    /// Set by `stop`, cleared by the next `add`
    stopped: bool,
}

impl QueueState {
    fn insert(&mut self, entry: Entry) {
        let index = self
            .entries
            .partition_point(|queued| queued.priority >= entry.priority);
        self.entries.insert(index, entry);
    }
}

struct Inner {
    config: QueueConfig,
    handler: Arc<dyn NotificationHandler>,
    state: parking_lot::Mutex<QueueState>,
    stop: Notify,
}

/// Handle to a dispatch queue; clones share the same queue
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DispatchQueue")
            .field("config", &self.inner.config)
            .field("len", &state.entries.len())
            .field("draining", &state.draining)
            .finish_non_exhaustive()
    }
}

impl DispatchQueue {
    #[must_use]
    pub fn new(config: QueueConfig, handler: Arc<dyn NotificationHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state: parking_lot::Mutex::new(QueueState::default()),
                stop: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Queue a job, starting the drain loop if it is idle
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueFull`] if the queue already holds
    /// `max_size` jobs; the queue is left untouched.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, which hosts the drain loop.
    pub fn add(&self, job: NotificationJob, priority: u32) -> Result<(), DeliveryError> {
        let capacity = self.inner.config.max_size;

        let start = {
            let mut state = self.inner.state.lock();

            if state.entries.len() >= capacity {
                drop(state);
                if let Some(metrics) = herald_metrics::get() {
                    metrics.queue.record_full();
                }
                tracing::warn!(job_id = %job.id, capacity, "Dispatch queue full, rejecting job");
                return Err(DeliveryError::QueueFull { capacity });
            }

            tracing::debug!(job_id = %job.id, kind = %job.kind, priority, "Queued notification");
            state.insert(Entry { job, priority });
            self.publish(state.entries.len());

            state.stopped = false;
            !std::mem::replace(&mut state.draining, true)
        };

        if start {
            tokio::spawn(self.clone().drain());
        }

        Ok(())
    }

    async fn drain(self) {
        internal!("Dispatch queue drain loop started");
        let interval = self.inner.config.process_interval();

        loop {
            let batch: Vec<Entry> = {
                let mut state = self.inner.state.lock();

                if state.stopped {
                    state.draining = false;
                    internal!("Dispatch queue drain loop halted");
                    return;
                }

                if state.entries.is_empty() {
                    state.draining = false;
                    internal!("Dispatch queue empty, drain loop idle");
                    return;
                }

                let count = self
                    .inner
                    .config
                    .batch_size
                    .max(1)
                    .min(state.entries.len());
                let batch = state.entries.drain(..count).collect();
                self.publish(state.entries.len());
                batch
            };

            self.process_batch(batch).await;

            let stopped = self.inner.stop.notified();
            tokio::pin!(stopped);
            stopped.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if state.stopped {
                    state.draining = false;
                    internal!("Dispatch queue drain loop halted");
                    return;
                }
            }

            // A stop wakes the loop early; the check at the top decides whether
            // it exits or an `add` since then has asked it to carry on
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = stopped => {}
            }
        }
    }

    async fn process_batch(&self, batch: Vec<Entry>) {
        let started = Instant::now();
        let metrics = herald_metrics::get();
        let mut entries = batch.into_iter();

        while let Some(entry) = entries.next() {
            let kind = entry.job.kind.label();

            match self.inner.handler.handle(&entry.job).await {
                Ok(()) => {
                    if let Some(metrics) = metrics {
                        metrics.queue.record_processed(kind);
                    }
                }
                Err(err) if err.is_terminal() => {
                    tracing::warn!(
                        job_id = %entry.job.id,
                        kind,
                        error = %err,
                        "Dropping notification after terminal failure"
                    );
                    if let Some(metrics) = metrics {
                        metrics.queue.record_error(kind, err.class());
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        job_id = %entry.job.id,
                        kind,
                        error = %err,
                        "Notification failed, requeueing the rest of the batch"
                    );
                    if let Some(metrics) = metrics {
                        metrics.queue.record_error(kind, err.class());
                    }

                    self.requeue(std::iter::once(entry).chain(entries));
                    break;
                }
            }
        }

        if let Some(metrics) = metrics {
            metrics.queue.record_batch(started.elapsed().as_secs_f64());
        }
    }

    fn requeue(&self, entries: impl Iterator<Item = Entry>) {
        let mut state = self.inner.state.lock();
        let capacity = self.inner.config.max_size;
        let mut requeued = 0u64;
        let mut dropped = 0u64;

        for entry in entries {
            if state.entries.len() >= capacity {
                dropped += 1;
                continue;
            }

            state.insert(Entry {
                priority: entry.priority.saturating_sub(1),
                job: entry.job,
            });
            requeued += 1;
        }

        self.publish(state.entries.len());
        drop(state);

        if dropped > 0 {
            tracing::warn!(dropped, capacity, "Dispatch queue full, dropped jobs while requeueing");
        }
        if let Some(metrics) = herald_metrics::get() {
            metrics.queue.record_requeued(requeued);
        }
    }

    /// Halt the drain loop at its next check point, leaving queued jobs in place
    ///
    /// A batch already in progress completes first. A later [`add`](Self::add)
    /// restarts draining; if it arrives before the old loop reaches its check
    /// point, that loop simply carries on, so two loops never run at once.
    pub fn stop(&self) {
        self.inner.state.lock().stopped = true;
        self.inner.stop.notify_waiters();
        internal!("Dispatch queue stopped");
    }

    /// Discard every queued job
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        let discarded = state.entries.len();
        state.entries.clear();
        self.publish(0);
        drop(state);

        tracing::info!(discarded, "Dispatch queue cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a drain loop is currently active
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    fn publish(&self, len: usize) {
        if let Some(metrics) = herald_metrics::get() {
            metrics.queue.set_size(len as u64);
        }
    }

    #[cfg(test)]
    fn priorities(&self) -> Vec<(String, u32)> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .map(|entry| (entry.job.recipient.address.clone(), entry.priority))
            .collect()
    }
}
