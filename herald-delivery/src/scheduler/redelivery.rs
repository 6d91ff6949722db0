use std::sync::Arc;

use chrono::Utc;
use herald_common::{Signal, internal, tracing};
use herald_store::ScheduledStore;
use herald_tracing::traced;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{InFlight, SchedulerConfig, settle};
use crate::{error::DeliveryError, queue::DispatchQueue, types::NotificationJob};

/// Polls the store for due records and enqueues them at priority 0
#[derive(Debug, Clone)]
pub struct RedeliveryLoop {
    store: Arc<dyn ScheduledStore>,
    queue: DispatchQueue,
    in_flight: Arc<InFlight>,
    config: SchedulerConfig,
}

impl RedeliveryLoop {
    #[must_use]
    pub const fn new(
        store: Arc<dyn ScheduledStore>,
        queue: DispatchQueue,
        in_flight: Arc<InFlight>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            in_flight,
            config,
        }
    }

    /// Run one poll, returning the number of records enqueued
    ///
    /// Records already in flight are skipped. A record the queue refuses
    /// spends one retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn tick(&self) -> Result<usize, DeliveryError> {
        let due = self
            .store
            .find_due(Utc::now(), self.config.batch_limit)
            .await?;

        let mut enqueued = 0;
        for record in due {
            if !self.in_flight.try_claim(&record.id) {
                continue;
            }

            match self.queue.add(NotificationJob::from_scheduled(&record), 0) {
                Ok(()) => enqueued += 1,
                Err(err) => {
                    self.in_flight.release(&record.id);
                    tracing::warn!(id = %record.id, error = %err, "Could not enqueue scheduled notification");
                    settle(self.store.as_ref(), &record, Err(&err)).await;
                }
            }
        }

        Ok(enqueued)
    }

    /// Poll until a shutdown signal arrives
    ///
    /// Waits `poll_interval_ms` between polls, or `error_backoff_ms` after a
    /// poll that failed.
    ///
    /// # Errors
    ///
    /// Never fails at present: failed polls are logged and retried after the
    /// backoff.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), DeliveryError> {
        internal!(level = INFO, "Scheduled redelivery loop starting");

        loop {
            let pause = match self.tick().await {
                Ok(0) => self.config.poll_interval(),
                Ok(count) => {
                    tracing::debug!(count, "Enqueued due scheduled notifications");
                    self.config.poll_interval()
                }
                Err(err) => {
                    tracing::error!(error = %err, "Error polling scheduled notifications");
                    if let Some(metrics) = herald_metrics::get() {
                        metrics.scheduled.record_error("find_due");
                    }
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                biased;

                sig = shutdown.recv() => {
                    if ends_loop(sig) {
                        break;
                    }
                }
                () = tokio::time::sleep(pause) => {}
            }
        }

        Ok(())
    }
}

/// Whether a message from the shutdown channel ends the loop
///
/// A lagged receiver has only missed messages; the ones still retained are
/// read on the next pass.
fn ends_loop(sig: Result<Signal, RecvError>) -> bool {
    match sig {
        Ok(Signal::Shutdown | Signal::Finalised) => {
            internal!(level = INFO, "Scheduled redelivery loop received shutdown signal");
            true
        }
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Scheduled redelivery loop lagged behind the shutdown channel");
            false
        }
        Err(RecvError::Closed) => {
            tracing::error!("Scheduled redelivery loop shutdown channel closed");
            true
        }
    }
}
