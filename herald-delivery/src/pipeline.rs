//! The assembled delivery pipeline
//!
//! ```text
//! store ─┬─> Scheduler (API)
//!        └─> RedeliveryLoop ──> DispatchQueue ──> Dispatcher ─┬─> EmailSender ──> smtp
//!                                    ^                        └─> SmsSender ───> sms
//!                         enqueue ───┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{Channel, NotificationKind, Signal, internal};
use herald_store::{
    BulkUpdateOutcome, MemoryPreferenceStore, NewScheduledNotification, NotificationId,
    NotificationPreferences, PreferenceStore, PreferencesUpdate, ScheduledNotification,
    ScheduledStore,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    channel::{EmailSender, EmailTransport, SmsSender, SmsTransport},
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    dispatch::Dispatcher,
    error::DeliveryError,
    policy::RetryPolicy,
    preferences::Preferences,
    queue::{DispatchQueue, QueueConfig},
    rate_limiter::{LimiterStats, RateLimitConfig},
    registry::ResilienceRegistry,
    scheduler::{InFlight, RedeliveryLoop, Scheduler, SchedulerConfig},
    service::NotificationService,
    types::NotificationJob,
};

/// Configuration of every pipeline component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl PipelineConfig {
    /// # Errors
    ///
    /// [`SystemError::Configuration`](crate::SystemError::Configuration) for a
    /// rate limit that could never hand out a token.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        self.rate_limit.validate()
    }
}

/// Transports the pipeline delivers through; a missing one disables its channel
#[derive(Clone, Default)]
pub struct Transports {
    pub email: Option<Arc<dyn EmailTransport>>,
    pub sms: Option<Arc<dyn SmsTransport>>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<ResilienceRegistry>,
    queue: DispatchQueue,
    scheduler: Scheduler,
    redelivery: RedeliveryLoop,
    preferences: Preferences,
}

impl Pipeline {
    /// A pipeline keeping user preferences in memory
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ScheduledStore>,
        transports: Transports,
    ) -> Self {
        Self::with_preferences(
            config,
            store,
            Arc::new(MemoryPreferenceStore::new()),
            transports,
        )
    }

    /// Wire the pipeline: registry → senders → dispatcher → queue → scheduler
    #[must_use]
    pub fn with_preferences(
        config: PipelineConfig,
        store: Arc<dyn ScheduledStore>,
        preference_store: Arc<dyn PreferenceStore>,
        transports: Transports,
    ) -> Self {
        let registry = Arc::new(ResilienceRegistry::new(
            config.rate_limit,
            config.circuit_breaker,
            config.retry,
        ));

        let email = transports
            .email
            .map(|transport| EmailSender::new(transport, registry.guard(Channel::Email)));
        let sms = transports
            .sms
            .map(|transport| SmsSender::new(transport, registry.guard(Channel::Sms)));

        let in_flight = Arc::new(InFlight::new(config.scheduler.in_flight_lease()));
        let preferences = Preferences::new(preference_store);
        let dispatcher = Dispatcher::new(
            email,
            sms,
            Arc::clone(&store),
            Arc::clone(&in_flight),
            preferences.clone(),
        );
        let queue = DispatchQueue::new(config.queue, Arc::new(dispatcher));

        let scheduler = Scheduler::new(Arc::clone(&store));
        let redelivery = RedeliveryLoop::new(store, queue.clone(), in_flight, config.scheduler);

        Self {
            registry,
            queue,
            scheduler,
            redelivery,
            preferences,
        }
    }

    #[must_use]
    pub const fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn redelivery(&self) -> &RedeliveryLoop {
        &self.redelivery
    }

    #[must_use]
    pub const fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    /// Run the redelivery loop until shutdown, then stop the dispatch queue
    ///
    /// Jobs still queued at shutdown are not drained; scheduled records among
    /// them are still pending and are picked up again on the next start.
    ///
    /// # Errors
    ///
    /// Propagates an error from the redelivery loop.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), DeliveryError> {
        let result = self.redelivery.serve(shutdown).await;

        self.queue.stop();
        internal!(
            level = INFO,
            remaining = self.queue.len(),
            "Delivery pipeline stopped"
        );

        result
    }
}

#[async_trait]
impl NotificationService for Pipeline {
    fn enqueue(&self, job: NotificationJob, priority: u32) -> Result<(), DeliveryError> {
        self.queue.add(job, priority)
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    async fn schedule(
        &self,
        new: NewScheduledNotification,
    ) -> Result<ScheduledNotification, DeliveryError> {
        self.scheduler.schedule(new).await
    }

    async fn bulk_schedule(
        &self,
        news: Vec<NewScheduledNotification>,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError> {
        self.scheduler.bulk_schedule(news).await
    }

    async fn cancel(&self, id: &NotificationId) -> Result<ScheduledNotification, DeliveryError> {
        self.scheduler.cancel(id).await
    }

    async fn reschedule(
        &self,
        id: &NotificationId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<ScheduledNotification, DeliveryError> {
        self.scheduler.reschedule(id, scheduled_for).await
    }

    async fn scheduled(&self, id: &NotificationId) -> Result<ScheduledNotification, DeliveryError> {
        self.scheduler.get(id).await
    }

    async fn pending_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError> {
        self.scheduler.pending_for_user(user_id).await
    }

    async fn failed_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ScheduledNotification>, DeliveryError> {
        self.scheduler.failed_for_user(user_id).await
    }

    async fn preferences(&self, user_id: &str) -> Result<NotificationPreferences, DeliveryError> {
        self.preferences.get(user_id).await
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> Result<NotificationPreferences, DeliveryError> {
        self.preferences.update(user_id, update).await
    }

    async fn bulk_update_preferences(
        &self,
        user_ids: &[String],
        update: &PreferencesUpdate,
    ) -> Result<BulkUpdateOutcome, DeliveryError> {
        self.preferences.bulk_update(user_ids, update).await
    }

    async fn should_send(&self, user_id: &str, channel: Channel, kind: &NotificationKind) -> bool {
        self.preferences.should_send(user_id, channel, kind).await
    }

    fn breaker_state(&self, service: &str) -> Option<CircuitState> {
        self.registry.breaker_state(service)
    }

    fn limiter_stats(&self, service: &str) -> Option<LimiterStats> {
        self.registry.limiter_stats(service)
    }
}
