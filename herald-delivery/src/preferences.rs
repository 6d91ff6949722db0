//! Per-user notification preferences
//!
//! The dispatcher asks [`Preferences::should_send`] before delivering a job
//! that names its user. A lookup failure never blocks delivery: the answer
//! falls back to "send".

use std::sync::Arc;

use herald_common::{Channel, NotificationKind, tracing};
use herald_store::{
    BulkUpdateOutcome, NotificationPreferences, PreferenceStore, PreferencesUpdate, StoreError,
};

use crate::error::{DeliveryError, TerminalError};

#[derive(Debug, Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    #[must_use]
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// A user's preferences, storing the defaults if they have none yet
    ///
    /// # Errors
    ///
    /// The store's error.
    pub async fn get(&self, user_id: &str) -> Result<NotificationPreferences, DeliveryError> {
        let stored = match self.store.get(user_id).await {
            Ok(Some(preferences)) => return Ok(preferences),
            Ok(None) => {
                self.store
                    .upsert(user_id, &PreferencesUpdate::default())
                    .await
            }
            Err(err) => Err(err),
        };

        observe("get", stored)
    }

    /// Change some of a user's preferences
    ///
    /// # Errors
    ///
    /// [`TerminalError::InvalidPreferences`] if the update is rejected, or the
    /// store's error.
    pub async fn update(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> Result<NotificationPreferences, DeliveryError> {
        let preferences = observe("update", self.store.upsert(user_id, update).await)?;

        tracing::info!(user_id, "Notification preferences updated");
        if let Some(metrics) = herald_metrics::get() {
            metrics.preferences.record_updated();
        }

        Ok(preferences)
    }

    /// Apply the same change to many users at once
    ///
    /// # Errors
    ///
    /// [`TerminalError::InvalidPreferences`] if the update is rejected, or the
    /// store's error.
    pub async fn bulk_update(
        &self,
        user_ids: &[String],
        update: &PreferencesUpdate,
    ) -> Result<BulkUpdateOutcome, DeliveryError> {
        let outcome = observe("bulk_update", self.store.upsert_many(user_ids, update).await)?;

        tracing::info!(
            count = outcome.count,
            modified = outcome.modified,
            upserted = outcome.upserted,
            "Notification preferences bulk updated"
        );
        if let Some(metrics) = herald_metrics::get() {
            metrics.preferences.record_bulk_updated(outcome.count as u64);
        }

        Ok(outcome)
    }

    /// Whether `user_id` accepts `kind` over `channel`; `true` if the lookup fails
    pub async fn should_send(
        &self,
        user_id: &str,
        channel: Channel,
        kind: &NotificationKind,
    ) -> bool {
        match self.store.get(user_id).await {
            Ok(Some(preferences)) => preferences.allows(channel, kind),
            Ok(None) => NotificationPreferences::defaults(user_id, chrono::Utc::now())
                .allows(channel, kind),
            Err(err) => {
                tracing::warn!(
                    user_id,
                    error = %err,
                    "Preference lookup failed, sending anyway"
                );
                record_error("check");
                true
            }
        }
    }
}

fn record_error(operation: &str) {
    if let Some(metrics) = herald_metrics::get() {
        metrics.preferences.record_error(operation);
    }
}

fn observe<T>(operation: &str, result: herald_store::Result<T>) -> Result<T, DeliveryError> {
    result.map_err(|err| {
        tracing::warn!(operation, error = %err, "Preference operation failed");
        record_error(operation);
        match err {
            StoreError::InvalidPreferences(reason) => {
                TerminalError::InvalidPreferences(reason).into()
            }
            other => other.into(),
        }
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use herald_store::{ChannelPreferences, MemoryPreferenceStore, WebhookPreferences};

    use super::*;

    /// Every call fails as if the backing database were down
    #[derive(Debug)]
    struct Unreachable;

    #[async_trait]
    impl PreferenceStore for Unreachable {
        async fn get(&self, _: &str) -> herald_store::Result<Option<NotificationPreferences>> {
            Err(StoreError::Internal("connection refused".to_string()))
        }

        async fn upsert(
            &self,
            _: &str,
            _: &PreferencesUpdate,
        ) -> herald_store::Result<NotificationPreferences> {
            Err(StoreError::Internal("connection refused".to_string()))
        }

        async fn upsert_many(
            &self,
            _: &[String],
            _: &PreferencesUpdate,
        ) -> herald_store::Result<BulkUpdateOutcome> {
            Err(StoreError::Internal("connection refused".to_string()))
        }
    }

    fn preferences() -> Preferences {
        Preferences::new(Arc::new(MemoryPreferenceStore::new()))
    }

    #[tokio::test]
    async fn test_get_stores_defaults() {
        let preferences = preferences();

        let created = preferences.get("u1").await.unwrap();
        assert!(created.email.order_confirmation);
        assert!(!created.email.marketing);

        let again = preferences.get("u1").await.unwrap();
        assert_eq!(again.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn test_unknown_user_gets_transactional_notifications() {
        let preferences = preferences();

        assert!(
            preferences
                .should_send("u1", Channel::Sms, &NotificationKind::PaymentConfirmation)
                .await
        );
        assert!(
            !preferences
                .should_send("u1", Channel::Sms, &NotificationKind::Custom("marketing".to_string()))
                .await
        );
    }

    #[tokio::test]
    async fn test_opt_out_is_per_channel() {
        let preferences = preferences();
        let update = PreferencesUpdate {
            sms: Some(ChannelPreferences {
                order_confirmation: false,
                ..ChannelPreferences::default()
            }),
            ..PreferencesUpdate::default()
        };
        preferences.update("u1", &update).await.unwrap();

        let kind = NotificationKind::OrderConfirmation;
        assert!(!preferences.should_send("u1", Channel::Sms, &kind).await);
        assert!(preferences.should_send("u1", Channel::Email, &kind).await);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_sending() {
        let preferences = Preferences::new(Arc::new(Unreachable));

        assert!(
            preferences
                .should_send("u1", Channel::Email, &NotificationKind::OrderConfirmation)
                .await
        );
        assert!(preferences.get("u1").await.unwrap_err().is_system());
    }

    #[tokio::test]
    async fn test_invalid_update_is_terminal() {
        let preferences = preferences();
        let update = PreferencesUpdate {
            webhook: Some(WebhookPreferences {
                enabled: true,
                ..WebhookPreferences::default()
            }),
            ..PreferencesUpdate::default()
        };

        let err = preferences
            .bulk_update(&["u1".to_string()], &update)
            .await
            .unwrap_err();

        assert!(err.is_terminal());
        assert!(err.to_string().contains("webhook URL"));
    }
}
