use chrono::{DateTime, Utc};

use crate::{
    NewScheduledNotification, NotificationId, ScheduleStatus, ScheduledNotification,
    preferences::{BulkUpdateOutcome, NotificationPreferences, PreferencesUpdate},
};

/// Persistence for scheduled notifications
///
/// Every mutation is atomic per record and conditional on the record's
/// current status, so the redelivery loop and external callers can race on
/// the same record without a store-wide lock.
#[async_trait::async_trait]
pub trait ScheduledStore: Send + Sync + std::fmt::Debug {
    /// Persist a new pending record
    async fn create(&self, new: NewScheduledNotification) -> crate::Result<ScheduledNotification>;

    /// Persist several records; either all are created or none are
    async fn create_many(
        &self,
        news: Vec<NewScheduledNotification>,
    ) -> crate::Result<Vec<ScheduledNotification>>;

    async fn get(&self, id: &NotificationId) -> crate::Result<ScheduledNotification>;

    /// Pending records with `scheduled_for <= now`, oldest first, at most `limit`
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> crate::Result<Vec<ScheduledNotification>>;

    /// Move a record from `expected` to `status` and store its new retry count
    async fn update_status(
        &self,
        id: &NotificationId,
        expected: ScheduleStatus,
        status: ScheduleStatus,
        retry_count: u32,
    ) -> crate::Result<ScheduledNotification>;

    /// Cancel a pending record
    async fn cancel(&self, id: &NotificationId) -> crate::Result<ScheduledNotification>;

    /// Move a record back to pending at a new time
    async fn reschedule(
        &self,
        id: &NotificationId,
        scheduled_for: DateTime<Utc>,
    ) -> crate::Result<ScheduledNotification>;

    /// A user's pending records, earliest `scheduled_for` first
    async fn pending_for_user(&self, user_id: &str) -> crate::Result<Vec<ScheduledNotification>>;

    /// A user's failed records, most recently updated first
    async fn failed_for_user(&self, user_id: &str) -> crate::Result<Vec<ScheduledNotification>>;
}

/// Persistence for per-user notification preferences
///
/// Updates are upserts: a user without stored preferences starts from
/// [`NotificationPreferences::defaults`].
#[async_trait::async_trait]
pub trait PreferenceStore: Send + Sync + std::fmt::Debug {
    /// Stored preferences, if the user has any
    async fn get(&self, user_id: &str) -> crate::Result<Option<NotificationPreferences>>;

    /// Apply `update` to one user's preferences
    async fn upsert(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> crate::Result<NotificationPreferences>;

    /// Apply the same `update` to every user in `user_ids`
    async fn upsert_many(
        &self,
        user_ids: &[String],
        update: &PreferencesUpdate,
    ) -> crate::Result<BulkUpdateOutcome>;
}
