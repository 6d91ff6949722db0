//! Time-scheduled notifications
//!
//! [`Scheduler`] is the API callers use to create and manage scheduled
//! records; [`RedeliveryLoop`] polls the store for due records and feeds
//! them into the dispatch queue. Delivery outcomes are written back to the
//! record by [`settle`].

mod in_flight;
mod redelivery;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use herald_common::tracing;
use herald_store::{
    NewScheduledNotification, NotificationId, ScheduleStatus, ScheduledNotification,
    ScheduledStore, StoreError,
};
use serde::{Deserialize, Serialize};

pub use in_flight::InFlight;
pub use redelivery::RedeliveryLoop;

use crate::error::{DeliveryError, TerminalError};

/// Configuration for the redelivery loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between polls (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after a failed poll (milliseconds)
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Due records fetched per poll
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// How long an enqueued record is protected from being enqueued again (seconds)
    #[serde(default = "default_in_flight_lease_secs")]
    pub in_flight_lease_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            batch_limit: default_batch_limit(),
            in_flight_lease_secs: default_in_flight_lease_secs(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    #[must_use]
    pub const fn in_flight_lease(&self) -> Duration {
        Duration::from_secs(self.in_flight_lease_secs)
    }
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_error_backoff_ms() -> u64 {
    5000
}

const fn default_batch_limit() -> usize {
    100
}

const fn default_in_flight_lease_secs() -> u64 {
    300
}

/// Record the outcome of a delivery attempt on its scheduled record
///
/// Success marks the record sent. A failure spends one retry; the record
/// fails once its retries are used up, or straight away on a terminal error,
/// and otherwise stays pending for a later poll. The update is conditional on
/// the record still being pending, so a concurrent cancel wins.
pub(crate) async fn settle(
    store: &dyn ScheduledStore,
    record: &ScheduledNotification,
    outcome: Result<(), &DeliveryError>,
) {
    let kind = record.kind.label();

    let (status, retry_count) = match outcome {
        Ok(()) => (ScheduleStatus::Sent, record.retry_count),
        Err(err) => {
            let retry_count = record.retry_count.saturating_add(1);
            let status = if err.is_terminal() || retry_count >= record.max_retries {
                ScheduleStatus::Failed
            } else {
                ScheduleStatus::Pending
            };
            (status, retry_count)
        }
    };

    match store
        .update_status(&record.id, ScheduleStatus::Pending, status, retry_count)
        .await
    {
        Ok(_) => {
            let metrics = herald_metrics::get();
            match status {
                ScheduleStatus::Sent => {
                    tracing::info!(id = %record.id, kind, "Scheduled notification sent");
                    if let Some(metrics) = metrics {
                        metrics.scheduled.record_processed(kind);
                    }
                }
                ScheduleStatus::Failed => {
                    tracing::warn!(
                        id = %record.id,
                        kind,
                        retry_count,
                        "Scheduled notification failed permanently"
                    );
                    if let Some(metrics) = metrics {
                        metrics.scheduled.record_failed(kind);
                    }
                }
                _ => {
                    tracing::debug!(
                        id = %record.id,
                        kind,
                        retry_count,
                        max_retries = record.max_retries,
                        "Scheduled notification will be retried"
                    );
                }
            }
        }
        Err(err @ StoreError::Conflict { .. }) => {
            tracing::info!(id = %record.id, error = %err, "Scheduled notification changed while in flight");
        }
        Err(err) => {
            tracing::error!(id = %record.id, error = %err, "Failed to update scheduled notification");
            if let Some(metrics) = herald_metrics::get() {
                metrics.scheduled.record_error("update_status");
            }
        }
    }
}

/// Create and manage scheduled notifications
#[derive(Debug, Clone)]
pub struct Scheduler {
    store: Arc<dyn ScheduledStore>,
}

impl Scheduler {
    #[must_use]
    pub fn new(store: Arc<dyn ScheduledStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ScheduledStore> {
        &self.store
    }

    /// Schedule a notification for later delivery
    ///
    /// # Errors
    ///
    /// [`TerminalError::MissingRecipient`] for a blank recipient, or the
    /// store's error.
    pub async fn schedule(
        &self,
        new: NewScheduledNotification,
    ) -> Result<ScheduledNotification, DeliveryError> {
        validate(&new).inspect_err(|_| record_error("schedule"))?;

        let record = observe("schedule", self.store.create(new).await)?;

        tracing::info!(
            id = %record.id,
            user_id = %record.user_id,
            kind = %record.kind,
            scheduled_for = %record.scheduled_for,
            "Notification scheduled"
        );
        if let Some(metrics) = herald_metrics::get() {
            metrics.scheduled.record_created(record.kind.label());
        }

        Ok(record)
    }

    /// Schedule several notifications at once; either all are created or none are
    ///
    /// # Errors
    ///
    /// The first validation failure, or the store's error.
    pub async fn bulk_schedule(
        &self,
        news: Vec<NewScheduledNotification>,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError> {
        news.iter()
            .try_for_each(validate)
            .inspect_err(|_| record_error("bulk_schedule"))?;

        let records = observe("bulk_schedule", self.store.create_many(news).await)?;

        tracing::info!(count = records.len(), "Bulk notifications scheduled");
        if let Some(metrics) = herald_metrics::get() {
            metrics.scheduled.record_bulk_created(records.len() as u64);
        }

        Ok(records)
    }

    /// Cancel a pending notification
    ///
    /// A job already handed to the dispatch queue is not retracted, but it is
    /// not sent: the dispatcher re-reads the record before delivering.
    ///
    /// # Errors
    ///
    /// The store's error, e.g. when the record is not pending.
    pub async fn cancel(&self, id: &NotificationId) -> Result<ScheduledNotification, DeliveryError> {
        let record = observe("cancel", self.store.cancel(id).await)?;

        tracing::info!(id = %id, "Scheduled notification cancelled");
        if let Some(metrics) = herald_metrics::get() {
            metrics.scheduled.record_cancelled();
        }

        Ok(record)
    }

    /// Move a notification to a new delivery time, with a fresh retry budget
    ///
    /// # Errors
    ///
    /// The store's error, e.g. when the record was already sent.
    pub async fn reschedule(
        &self,
        id: &NotificationId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<ScheduledNotification, DeliveryError> {
        let record = observe("reschedule", self.store.reschedule(id, scheduled_for).await)?;

        tracing::info!(id = %id, scheduled_for = %scheduled_for, "Scheduled notification rescheduled");
        if let Some(metrics) = herald_metrics::get() {
            metrics.scheduled.record_rescheduled();
        }

        Ok(record)
    }

    /// # Errors
    ///
    /// The store's error.
    pub async fn get(&self, id: &NotificationId) -> Result<ScheduledNotification, DeliveryError> {
        observe("get", self.store.get(id).await)
    }

    /// A user's pending notifications, earliest first
    ///
    /// # Errors
    ///
    /// The store's error.
    pub async fn pending_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError> {
        observe("pending_for_user", self.store.pending_for_user(user_id).await)
    }

    /// A user's failed notifications, most recently updated first
    ///
    /// # Errors
    ///
    /// The store's error.
    pub async fn failed_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError> {
        observe("failed_for_user", self.store.failed_for_user(user_id).await)
    }
}

fn validate(new: &NewScheduledNotification) -> Result<(), DeliveryError> {
    if new.recipient.address.trim().is_empty() {
        return Err(TerminalError::MissingRecipient.into());
    }
    Ok(())
}

fn record_error(operation: &str) {
    if let Some(metrics) = herald_metrics::get() {
        metrics.scheduled.record_error(operation);
    }
}

fn observe<T>(operation: &str, result: Result<T, StoreError>) -> Result<T, DeliveryError> {
    result.map_err(|err| {
        tracing::warn!(operation, error = %err, "Scheduled notification operation failed");
        record_error(operation);
        err.into()
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use herald_common::{Channel, Content, NotificationKind, Recipient};
    use herald_store::MemoryStore;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::TransientError;

    fn request(user: &str, address: &str, offset_secs: i64) -> NewScheduledNotification {
        NewScheduledNotification::new(
            user,
            NotificationKind::Custom("reminder".to_string()),
            Channel::Email,
            Recipient::new(address),
            Content::new("Don't forget your cart").with_subject("Reminder"),
            Utc::now() + ChronoDuration::seconds(offset_secs),
        )
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_schedule_rejects_blank_recipient() {
        let scheduler = scheduler();

        let result = scheduler.schedule(request("u1", " ", 60)).await;
        assert!(matches!(
            result,
            Err(DeliveryError::Terminal(TerminalError::MissingRecipient))
        ));
        assert!(scheduler.pending_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_schedule_is_all_or_nothing() {
        let scheduler = scheduler();

        let result = scheduler
            .bulk_schedule(vec![request("u1", "a@example.com", 60), request("u1", "", 60)])
            .await;
        assert!(result.is_err());
        assert!(scheduler.pending_for_user("u1").await.unwrap().is_empty());

        let records = scheduler
            .bulk_schedule(vec![
                request("u1", "a@example.com", 120),
                request("u1", "b@example.com", 60),
            ])
            .await
            .unwrap();
        assert_eq!(records.len(), 2);

        let pending = scheduler.pending_for_user("u1").await.unwrap();
        assert_eq!(pending[0].recipient.address, "b@example.com");
        assert_eq!(pending[1].recipient.address, "a@example.com");
    }

    #[tokio::test]
    async fn test_cancel_and_reschedule() {
        let scheduler = scheduler();
        let record = scheduler
            .schedule(request("u1", "a@example.com", 60))
            .await
            .unwrap();

        let cancelled = scheduler.cancel(&record.id).await.unwrap();
        assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
        assert!(scheduler.cancel(&record.id).await.is_err());

        let later = Utc::now() + ChronoDuration::hours(1);
        let rescheduled = scheduler.reschedule(&record.id, later).await.unwrap();
        assert_eq!(rescheduled.status, ScheduleStatus::Pending);
        assert_eq!(rescheduled.scheduled_for, later);
    }

    #[tokio::test]
    async fn test_settle_transitions() {
        let store = MemoryStore::new();
        let transient: DeliveryError = TransientError::Timeout("smtp".to_string()).into();
        let terminal: DeliveryError = TerminalError::MissingRecipient.into();

        let record = store
            .create(request("u1", "a@example.com", -1).with_max_retries(2))
            .await
            .unwrap();

        settle(&store, &record, Err(&transient)).await;
        let record = store.get(&record.id).await.unwrap();
        assert_eq!(record.status, ScheduleStatus::Pending);
        assert_eq!(record.retry_count, 1);

        settle(&store, &record, Err(&transient)).await;
        let record = store.get(&record.id).await.unwrap();
        assert_eq!(record.status, ScheduleStatus::Failed);
        assert_eq!(record.retry_count, 2);

        let other = store
            .create(request("u1", "b@example.com", -1))
            .await
            .unwrap();
        settle(&store, &other, Err(&terminal)).await;
        assert_eq!(
            store.get(&other.id).await.unwrap().status,
            ScheduleStatus::Failed
        );

        let sent = store
            .create(request("u1", "c@example.com", -1))
            .await
            .unwrap();
        settle(&store, &sent, Ok(())).await;
        assert_eq!(store.get(&sent.id).await.unwrap().status, ScheduleStatus::Sent);
    }

    #[tokio::test]
    async fn test_settle_loses_to_cancel() {
        let store = MemoryStore::new();
        let record = store
            .create(request("u1", "a@example.com", -1))
            .await
            .unwrap();

        store.cancel(&record.id).await.unwrap();
        settle(&store, &record, Ok(())).await;

        assert_eq!(
            store.get(&record.id).await.unwrap().status,
            ScheduleStatus::Cancelled
        );
    }
}
