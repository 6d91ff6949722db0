use std::fmt;

use chrono::{DateTime, Utc};
use herald_common::{Channel, Content, NotificationKind, Recipient};
use herald_store::{NotificationId, ScheduledNotification};
use serde::{Deserialize, Serialize};

/// Identifier of a single dispatch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(ulid::Ulid);

impl JobId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

/// The slice of an order the message templates need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub total_amount: f64,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Rendered through the template for the job's kind
    Order(OrderSummary),
    /// Sent as is
    Content(Content),
}

/// A unit of work for the dispatch queue
///
/// Jobs are immutable once created; the queue tracks priority separately.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationJob {
    pub id: JobId,
    pub kind: NotificationKind,
    pub channel: Channel,
    pub recipient: Recipient,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
    /// The scheduled notification this job was created from, if any
    pub origin: Option<NotificationId>,
    /// User whose preferences decide whether the job is sent
    pub user_id: Option<String>,
}

impl NotificationJob {
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        channel: Channel,
        recipient: Recipient,
        payload: Payload,
    ) -> Self {
        Self {
            id: JobId::generate(),
            kind,
            channel,
            recipient,
            payload,
            enqueued_at: Utc::now(),
            origin: None,
            user_id: None,
        }
    }

    /// Subject the job to `user_id`'s notification preferences
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Job for an order event, rendered through the kind's template
    #[must_use]
    pub fn for_order(
        kind: NotificationKind,
        channel: Channel,
        recipient: Recipient,
        order: OrderSummary,
    ) -> Self {
        Self::new(kind, channel, recipient, Payload::Order(order))
    }

    /// Job delivering a due scheduled notification
    #[must_use]
    pub fn from_scheduled(record: &ScheduledNotification) -> Self {
        Self {
            origin: Some(record.id.clone()),
            user_id: Some(record.user_id.clone()),
            ..Self::new(
                record.kind.clone(),
                record.channel,
                record.recipient.clone(),
                Payload::Content(record.content.clone()),
            )
        }
    }
}
