//! Vocabulary shared by the dispatch pipeline and the scheduled-notification store

use std::fmt;

use serde::{Deserialize, Serialize};

/// Delivery channel of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notification is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderConfirmation,
    PaymentConfirmation,
    ShippingConfirmation,
    Custom(String),
}

impl NotificationKind {
    /// Label used for metric attributes and log fields
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::OrderConfirmation => "order_confirmation",
            Self::PaymentConfirmation => "payment_confirmation",
            Self::ShippingConfirmation => "shipping_confirmation",
            Self::Custom(name) => name,
        }
    }

    /// Whether messages of this kind are composed from an order summary
    #[must_use]
    pub const fn needs_order(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who receives a notification. `address` is an email address or a phone
/// number depending on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The name to greet the recipient with, falling back to a generic salutation
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Customer")
    }
}

/// Free-form message content
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

impl Content {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}
