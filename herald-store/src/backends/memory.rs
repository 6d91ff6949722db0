use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    NewScheduledNotification, NotificationId, ScheduleStatus, ScheduledNotification, StoreError,
    preferences::{BulkUpdateOutcome, NotificationPreferences, PreferencesUpdate},
    r#trait::{PreferenceStore, ScheduledStore},
    types::{select_due, sort_failed, sort_pending},
};

/// In-memory store
///
/// Records live in a `HashMap` behind an `RwLock`. Intended for tests and
/// for deployments where scheduled notifications need not survive a restart.
///
/// # Capacity Management
/// An optional capacity bounds the number of records held; creates beyond it
/// fail with [`StoreError::CapacityExceeded`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<NotificationId, ScheduledNotification>>>,
    /// Maximum number of records (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryStore {
    /// Create an empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn check_capacity(&self, len: usize, additional: usize) -> crate::Result<()> {
        match self.capacity {
            Some(capacity) if len + additional > capacity => {
                Err(StoreError::CapacityExceeded { len, capacity })
            }
            _ => Ok(()),
        }
    }

    fn mutate(
        &self,
        id: &NotificationId,
        apply: impl FnOnce(&mut ScheduledNotification) -> crate::Result<()>,
    ) -> crate::Result<ScheduledNotification> {
        let mut records = self.records.write()?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        apply(record)?;
        Ok(record.clone())
    }

    fn collect_for_user(
        &self,
        user_id: &str,
        status: ScheduleStatus,
    ) -> crate::Result<Vec<ScheduledNotification>> {
        Ok(self
            .records
            .read()?
            .values()
            .filter(|r| r.user_id == user_id && r.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScheduledStore for MemoryStore {
    async fn create(&self, new: NewScheduledNotification) -> crate::Result<ScheduledNotification> {
        let mut records = self.records.write()?;
        self.check_capacity(records.len(), 1)?;

        let record = new.into_record(Utc::now());
        records.insert(record.id.clone(), record.clone());

        Ok(record)
    }

    async fn create_many(
        &self,
        news: Vec<NewScheduledNotification>,
    ) -> crate::Result<Vec<ScheduledNotification>> {
        let mut records = self.records.write()?;
        self.check_capacity(records.len(), news.len())?;

        let now = Utc::now();
        let created: Vec<_> = news.into_iter().map(|new| new.into_record(now)).collect();
        for record in &created {
            records.insert(record.id.clone(), record.clone());
        }

        Ok(created)
    }

    async fn get(&self, id: &NotificationId) -> crate::Result<ScheduledNotification> {
        self.records
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> crate::Result<Vec<ScheduledNotification>> {
        Ok(select_due(self.records.read()?.values(), now, limit))
    }

    async fn update_status(
        &self,
        id: &NotificationId,
        expected: ScheduleStatus,
        status: ScheduleStatus,
        retry_count: u32,
    ) -> crate::Result<ScheduledNotification> {
        self.mutate(id, |record| {
            record.transition(expected, status, retry_count, Utc::now())
        })
    }

    async fn cancel(&self, id: &NotificationId) -> crate::Result<ScheduledNotification> {
        self.mutate(id, |record| record.cancel(Utc::now()))
    }

    async fn reschedule(
        &self,
        id: &NotificationId,
        scheduled_for: DateTime<Utc>,
    ) -> crate::Result<ScheduledNotification> {
        self.mutate(id, |record| record.reschedule(scheduled_for, Utc::now()))
    }

    async fn pending_for_user(&self, user_id: &str) -> crate::Result<Vec<ScheduledNotification>> {
        let mut records = self.collect_for_user(user_id, ScheduleStatus::Pending)?;
        sort_pending(&mut records);
        Ok(records)
    }

    async fn failed_for_user(&self, user_id: &str) -> crate::Result<Vec<ScheduledNotification>> {
        let mut records = self.collect_for_user(user_id, ScheduleStatus::Failed)?;
        sort_failed(&mut records);
        Ok(records)
    }
}

/// In-memory preference store, keyed by user id
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferenceStore {
    preferences: Arc<RwLock<HashMap<String, NotificationPreferences>>>,
}

impl MemoryPreferenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Apply `update` to `user_id`, creating defaults first; true if they already existed
pub(crate) fn upsert_into(
    preferences: &mut HashMap<String, NotificationPreferences>,
    user_id: &str,
    update: &PreferencesUpdate,
    now: DateTime<Utc>,
) -> (NotificationPreferences, bool) {
    let existed = preferences.contains_key(user_id);
    let entry = preferences
        .entry(user_id.to_string())
        .or_insert_with(|| NotificationPreferences::defaults(user_id, now));

    entry.apply(update, now);
    (entry.clone(), existed)
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get(&self, user_id: &str) -> crate::Result<Option<NotificationPreferences>> {
        Ok(self.preferences.read()?.get(user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> crate::Result<NotificationPreferences> {
        update.validate()?;
        let mut preferences = self.preferences.write()?;
        Ok(upsert_into(&mut preferences, user_id, update, Utc::now()).0)
    }

    async fn upsert_many(
        &self,
        user_ids: &[String],
        update: &PreferencesUpdate,
    ) -> crate::Result<BulkUpdateOutcome> {
        update.validate()?;
        let mut preferences = self.preferences.write()?;
        let now = Utc::now();

        let mut outcome = BulkUpdateOutcome::default();
        for user_id in user_ids {
            let (_, existed) = upsert_into(&mut preferences, user_id, update, now);
            outcome.count += 1;
            if existed {
                outcome.modified += 1;
            } else {
                outcome.upserted += 1;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use herald_common::{Channel, Content, NotificationKind, Recipient};

    use super::*;

    fn request(user: &str, offset_secs: i64) -> NewScheduledNotification {
        NewScheduledNotification::new(
            user,
            NotificationKind::Custom("reminder".to_string()),
            Channel::Sms,
            Recipient::new("+15550100"),
            Content::new("Your cart is waiting"),
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();

        let record = store.create(request("u1", -1)).await.expect("create");
        assert_eq!(store.len(), 1);

        let read = store.get(&record.id).await.expect("get");
        assert_eq!(read, record);

        let due = store.find_due(Utc::now(), 100).await.expect("find_due");
        assert_eq!(due.len(), 1);

        let sent = store
            .update_status(&record.id, ScheduleStatus::Pending, ScheduleStatus::Sent, 0)
            .await
            .expect("update");
        assert_eq!(sent.status, ScheduleStatus::Sent);
        assert!(store.find_due(Utc::now(), 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryStore::with_capacity(2);

        store.create(request("u1", 10)).await.expect("first");
        store.create(request("u1", 10)).await.expect("second");

        let result = store.create(request("u1", 10)).await;
        assert!(matches!(
            result,
            Err(StoreError::CapacityExceeded {
                len: 2,
                capacity: 2
            })
        ));

        let bulk = store.create_many(vec![request("u2", 1)]).await;
        assert!(bulk.is_err());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_missing_record() {
        let store = MemoryStore::new();
        let id = NotificationId::generate();

        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.cancel(&id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_cancel_blocks_delivery_transition() {
        let store = MemoryStore::new();
        let record = store.create(request("u1", -1)).await.unwrap();

        store.cancel(&record.id).await.unwrap();

        let result = store
            .update_status(&record.id, ScheduleStatus::Pending, ScheduleStatus::Sent, 0)
            .await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(
            store.get(&record.id).await.unwrap().status,
            ScheduleStatus::Cancelled
        );
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_user_listings() {
        let store = MemoryStore::new();

        let later = store.create(request("u1", 300)).await.unwrap();
        let sooner = store.create(request("u1", 60)).await.unwrap();
        store.create(request("u2", 60)).await.unwrap();

        let pending = store.pending_for_user("u1").await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![sooner.id.clone(), later.id.clone()]);

        store
            .update_status(&later.id, ScheduleStatus::Pending, ScheduleStatus::Failed, 3)
            .await
            .unwrap();
        let failed = store.failed_for_user("u1").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, later.id);
        assert!(store.failed_for_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_preferences_upsert_and_bulk() {
        let store = MemoryPreferenceStore::new();
        assert!(store.get("u1").await.unwrap().is_none());

        let opt_out = PreferencesUpdate {
            sms: Some(crate::ChannelPreferences {
                shipping_confirmation: false,
                ..crate::ChannelPreferences::default()
            }),
            ..PreferencesUpdate::default()
        };
        let stored = store.upsert("u1", &opt_out).await.unwrap();
        assert!(!stored.sms.shipping_confirmation);
        assert!(stored.email.shipping_confirmation);

        let language = PreferencesUpdate {
            language: Some("fr".to_string()),
            ..PreferencesUpdate::default()
        };
        let outcome = store
            .upsert_many(&["u1".to_string(), "u2".to_string()], &language)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BulkUpdateOutcome {
                count: 2,
                modified: 1,
                upserted: 1,
            }
        );

        let u1 = store.get("u1").await.unwrap().unwrap();
        assert_eq!(u1.language, "fr");
        assert!(!u1.sms.shipping_confirmation);
        assert_eq!(store.get("u2").await.unwrap().unwrap().language, "fr");
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_invalid_preferences_are_not_stored() {
        let store = MemoryPreferenceStore::new();
        let update = PreferencesUpdate {
            timezone: Some(String::new()),
            ..PreferencesUpdate::default()
        };

        let result = store.upsert("u1", &update).await;

        assert!(matches!(result, Err(StoreError::InvalidPreferences(_))));
        assert!(store.get("u1").await.unwrap().is_none());
    }
}
