//! Per-user notification preferences
//!
//! A user without stored preferences gets [`NotificationPreferences::defaults`]:
//! every transactional kind on, marketing off, on every channel.

use chrono::{DateTime, Utc};
use herald_common::{Channel, NotificationKind};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Custom kind label gated by the `marketing` switch
pub const MARKETING: &str = "marketing";

const fn enabled() -> bool {
    true
}

/// Which kinds of notification a user accepts on one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    #[serde(default = "enabled")]
    pub order_confirmation: bool,

    #[serde(default = "enabled")]
    pub payment_confirmation: bool,

    #[serde(default = "enabled")]
    pub shipping_confirmation: bool,

    #[serde(default)]
    pub marketing: bool,
}

impl Default for ChannelPreferences {
    fn default() -> Self {
        Self {
            order_confirmation: true,
            payment_confirmation: true,
            shipping_confirmation: true,
            marketing: false,
        }
    }
}

impl ChannelPreferences {
    /// Whether `kind` may be sent
    ///
    /// Custom kinds other than [`MARKETING`] have no switch and are always allowed.
    #[must_use]
    pub fn allows(&self, kind: &NotificationKind) -> bool {
        match kind {
            NotificationKind::OrderConfirmation => self.order_confirmation,
            NotificationKind::PaymentConfirmation => self.payment_confirmation,
            NotificationKind::ShippingConfirmation => self.shipping_confirmation,
            NotificationKind::Custom(label) if label == MARKETING => self.marketing,
            NotificationKind::Custom(_) => true,
        }
    }
}

/// Outgoing webhook a user has registered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPreferences {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub secret: Option<String>,
}

/// Everything a user has chosen about the notifications they receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: String,
    pub email: ChannelPreferences,
    pub sms: ChannelPreferences,
    pub webhook: WebhookPreferences,
    pub language: String,
    pub timezone: String,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    /// Preferences of a user who never chose any
    #[must_use]
    pub fn defaults(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            email: ChannelPreferences::default(),
            sms: ChannelPreferences::default(),
            webhook: WebhookPreferences::default(),
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn channel(&self, channel: Channel) -> &ChannelPreferences {
        match channel {
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
        }
    }

    /// Whether `kind` may be sent to this user over `channel`
    #[must_use]
    pub fn allows(&self, channel: Channel, kind: &NotificationKind) -> bool {
        self.channel(channel).allows(kind)
    }

    /// Overwrite every section `update` sets
    pub fn apply(&mut self, update: &PreferencesUpdate, now: DateTime<Utc>) {
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(sms) = update.sms {
            self.sms = sms;
        }
        if let Some(webhook) = &update.webhook {
            self.webhook = webhook.clone();
        }
        if let Some(language) = &update.language {
            self.language.clone_from(language);
        }
        if let Some(timezone) = &update.timezone {
            self.timezone.clone_from(timezone);
        }
        self.updated_at = now;
    }
}

/// A partial change to a user's preferences; unset sections are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    #[serde(default)]
    pub email: Option<ChannelPreferences>,

    #[serde(default)]
    pub sms: Option<ChannelPreferences>,

    #[serde(default)]
    pub webhook: Option<WebhookPreferences>,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub timezone: Option<String>,
}

impl PreferencesUpdate {
    /// # Errors
    ///
    /// [`StoreError::InvalidPreferences`] if an enabled webhook has no URL, or
    /// the language or timezone is blank.
    pub fn validate(&self) -> crate::Result<()> {
        let webhook_without_url = self.webhook.as_ref().is_some_and(|webhook| {
            webhook.enabled && webhook.url.as_deref().is_none_or(|url| url.trim().is_empty())
        });

        if webhook_without_url {
            return Err(StoreError::InvalidPreferences(
                "webhook URL is required when webhook is enabled".to_string(),
            ));
        }

        if self.language.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(StoreError::InvalidPreferences(
                "language must not be empty".to_string(),
            ));
        }

        if self.timezone.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(StoreError::InvalidPreferences(
                "timezone must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Result of applying one update to many users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkUpdateOutcome {
    /// Users the update was applied to
    pub count: usize,
    /// Users that already had preferences
    pub modified: usize,
    /// Users whose preferences were created by the update
    pub upserted: usize,
}
