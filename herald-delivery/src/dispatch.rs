//! Routes drained jobs to their channel sender

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{Channel, tracing};
use herald_store::{NotificationId, ScheduledStore};

use crate::{
    channel::{EmailSender, SmsSender},
    error::{DeliveryError, TerminalError},
    preferences::Preferences,
    queue::NotificationHandler,
    scheduler::{InFlight, settle},
    types::NotificationJob,
};

/// The dispatch queue's handler
///
/// Jobs created from a scheduled record are re-checked against the store
/// before sending, so a record cancelled or rescheduled after it was enqueued
/// is skipped. Their outcome is written back to the record and never fails
/// the batch.
///
/// A job naming its user is dropped as handled when that user has opted out
/// of its kind on its channel; a scheduled record dropped this way is cancelled.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    email: Option<EmailSender>,
    sms: Option<SmsSender>,
    store: Arc<dyn ScheduledStore>,
    in_flight: Arc<InFlight>,
    preferences: Preferences,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(
        email: Option<EmailSender>,
        sms: Option<SmsSender>,
        store: Arc<dyn ScheduledStore>,
        in_flight: Arc<InFlight>,
        preferences: Preferences,
    ) -> Self {
        Self {
            email,
            sms,
            store,
            in_flight,
            preferences,
        }
    }

    /// Send `job` through the sender for its channel
    ///
    /// # Errors
    ///
    /// [`TerminalError::ChannelUnavailable`] if no sender is configured for the
    /// channel, otherwise the sender's error.
    pub async fn route(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        match job.channel {
            Channel::Email => match &self.email {
                Some(sender) => sender.send(job).await,
                None => Err(TerminalError::ChannelUnavailable(Channel::Email.to_string()).into()),
            },
            Channel::Sms => match &self.sms {
                Some(sender) => sender.send(job).await,
                None => Err(TerminalError::ChannelUnavailable(Channel::Sms.to_string()).into()),
            },
        }
    }

    /// Whether a record's job is still waiting in the queue or being sent
    #[must_use]
    pub fn is_in_flight(&self, id: &NotificationId) -> bool {
        self.in_flight.contains(id)
    }

    /// Whether the job's user declined this kind of notification on this channel
    async fn opted_out(&self, job: &NotificationJob) -> bool {
        let Some(user_id) = &job.user_id else {
            return false;
        };

        if self
            .preferences
            .should_send(user_id, job.channel, &job.kind)
            .await
        {
            return false;
        }

        tracing::info!(
            job_id = %job.id,
            user_id,
            channel = %job.channel,
            kind = %job.kind,
            "User opted out, skipping notification"
        );
        if let Some(metrics) = herald_metrics::get() {
            metrics
                .preferences
                .record_suppressed(job.channel.as_str(), job.kind.label());
        }

        true
    }

    async fn deliver_scheduled(&self, id: &NotificationId, job: &NotificationJob) {
        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "Scheduled notification vanished before delivery");
                return;
            }
        };

        if !record.is_due(Utc::now()) {
            tracing::info!(
                id = %id,
                status = %record.status,
                scheduled_for = %record.scheduled_for,
                "Skipping scheduled notification that is no longer due"
            );
            return;
        }

        if self.opted_out(job).await {
            if let Err(err) = self.store.cancel(id).await {
                tracing::warn!(id = %id, error = %err, "Could not cancel opted-out scheduled notification");
            }
            return;
        }

        let result = self.route(job).await;
        settle(self.store.as_ref(), &record, result.as_ref().map(|_| ())).await;
    }
}

#[async_trait]
impl NotificationHandler for Dispatcher {
    async fn handle(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        let Some(id) = &job.origin else {
            if self.opted_out(job).await {
                return Ok(());
            }
            return self.route(job).await;
        };

        self.deliver_scheduled(id, job).await;
        self.in_flight.release(id);

        Ok(())
    }
}
