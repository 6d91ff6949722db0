//! Service trait abstraction for the notification pipeline
//!
//! Ingest adapters (order events, HTTP handlers, the controller) depend on
//! this trait rather than on the concrete [`Pipeline`](crate::Pipeline), so
//! they can be tested against a mock.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn on_order_placed(service: &dyn NotificationService, job: NotificationJob) {
//!     if let Err(e) = service.enqueue(job, 1) {
//!         // apply backpressure
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{Channel, NotificationKind};
use herald_store::{
    BulkUpdateOutcome, NewScheduledNotification, NotificationId, NotificationPreferences,
    PreferencesUpdate, ScheduledNotification,
};

use crate::{
    circuit_breaker::CircuitState, error::DeliveryError, rate_limiter::LimiterStats,
    types::NotificationJob,
};

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Queue a job for immediate delivery
    ///
    /// # Errors
    ///
    /// [`DeliveryError::QueueFull`] when the dispatch queue is at capacity.
    fn enqueue(&self, job: NotificationJob, priority: u32) -> Result<(), DeliveryError>;

    /// Number of jobs waiting in the dispatch queue
    fn queue_len(&self) -> usize;

    async fn schedule(
        &self,
        new: NewScheduledNotification,
    ) -> Result<ScheduledNotification, DeliveryError>;

    async fn bulk_schedule(
        &self,
        news: Vec<NewScheduledNotification>,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError>;

    async fn cancel(&self, id: &NotificationId) -> Result<ScheduledNotification, DeliveryError>;

    async fn reschedule(
        &self,
        id: &NotificationId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<ScheduledNotification, DeliveryError>;

    async fn scheduled(&self, id: &NotificationId) -> Result<ScheduledNotification, DeliveryError>;

    async fn pending_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError>;

    async fn failed_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError>;

    /// A user's preferences, created with the defaults on first access
    async fn preferences(&self, user_id: &str) -> Result<NotificationPreferences, DeliveryError>;

    async fn update_preferences(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> Result<NotificationPreferences, DeliveryError>;

    async fn bulk_update_preferences(
        &self,
        user_ids: &[String],
        update: &PreferencesUpdate,
    ) -> Result<BulkUpdateOutcome, DeliveryError>;

    /// Whether the user accepts `kind` over `channel`
    async fn should_send(&self, user_id: &str, channel: Channel, kind: &NotificationKind) -> bool;

    /// Breaker state of a downstream service, once it has been used
    fn breaker_state(&self, service: &str) -> Option<CircuitState>;

    /// Limiter statistics of a downstream service, once it has been used
    fn limiter_stats(&self, service: &str) -> Option<LimiterStats>;
}
