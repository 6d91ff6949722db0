use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use herald_common::{Channel, Content, NotificationKind, Recipient};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Identifier for a scheduled notification
///
/// A ULID, so identifiers sort by creation time and double as the record's
/// filename in the file-backed store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId {
    id: ulid::Ulid,
}

impl NotificationId {
    /// Parse an identifier from a record filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`
    ///
    /// Rejects path separators, `..` and anything that is not a valid ULID.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') {
            return None;
        }

        if filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique identifier
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Filename the record is persisted under
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.bin", self.id)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for NotificationId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl Serialize for NotificationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a scheduled notification
///
/// `Pending` is the only non-terminal state: records move from it to `Sent`,
/// `Failed` or `Cancelled`, and only a reschedule moves them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A request to schedule a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScheduledNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub channel: Channel,
    pub recipient: Recipient,
    pub content: Content,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl NewScheduledNotification {
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        channel: Channel,
        recipient: Recipient,
        content: Content,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            channel,
            recipient,
            content,
            scheduled_for,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Materialise the request into a pending record
    #[must_use]
    pub fn into_record(self, now: DateTime<Utc>) -> ScheduledNotification {
        ScheduledNotification {
            id: NotificationId::generate(),
            user_id: self.user_id,
            kind: self.kind,
            channel: self.channel,
            recipient: self.recipient,
            content: self.content,
            scheduled_for: self.scheduled_for,
            status: ScheduleStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted scheduled notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: NotificationId,
    pub user_id: String,
    pub kind: NotificationKind,
    pub channel: Channel,
    pub recipient: Recipient,
    pub content: Content,
    pub scheduled_for: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledNotification {
    /// Pending and due at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.scheduled_for <= now
    }

    /// Conditionally move the record to `status`, failing if it is no longer in `expected`
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when the current status differs from `expected`.
    pub fn transition(
        &mut self,
        expected: ScheduleStatus,
        status: ScheduleStatus,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.status != expected {
            return Err(StoreError::Conflict {
                id: self.id.clone(),
                expected,
                actual: self.status,
            });
        }

        self.status = status;
        self.retry_count = retry_count;
        self.updated_at = now;
        Ok(())
    }

    /// # Errors
    ///
    /// [`StoreError::InvalidTransition`] unless the record is pending.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status != ScheduleStatus::Pending {
            return Err(StoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: ScheduleStatus::Cancelled,
            });
        }

        self.status = ScheduleStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Move the record back to pending at a new time with a fresh retry budget
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidTransition`] if the notification was already sent.
    pub fn reschedule(
        &mut self,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.status == ScheduleStatus::Sent {
            return Err(StoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: ScheduleStatus::Pending,
            });
        }

        self.scheduled_for = scheduled_for;
        self.status = ScheduleStatus::Pending;
        self.retry_count = 0;
        self.updated_at = now;
        Ok(())
    }
}

/// Sort orders used by the per-user listings
pub(crate) fn sort_pending(records: &mut [ScheduledNotification]) {
    records.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
}

pub(crate) fn sort_failed(records: &mut [ScheduledNotification]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
}

/// Due records, oldest `scheduled_for` first, at most `limit`
pub(crate) fn select_due<'a>(
    records: impl Iterator<Item = &'a ScheduledNotification>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<ScheduledNotification> {
    let mut due: Vec<_> = records.filter(|r| r.is_due(now)).cloned().collect();
    sort_pending(&mut due);
    due.truncate(limit);
    due
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(now: DateTime<Utc>) -> ScheduledNotification {
        NewScheduledNotification::new(
            "user-1",
            NotificationKind::Custom("reminder".to_string()),
            Channel::Email,
            Recipient::new("ada@example.com"),
            Content::new("Don't forget your cart"),
            now - Duration::seconds(5),
        )
        .into_record(now)
    }

    #[test]
    fn test_notification_id_validation() {
        assert!(NotificationId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_some());

        assert!(NotificationId::from_filename("../etc/passwd.bin").is_none());
        assert!(NotificationId::from_filename("foo/bar.bin").is_none());
        assert!(NotificationId::from_filename("..\\windows\\system32.bin").is_none());

        assert!(NotificationId::from_filename("not_a_valid_ulid.bin").is_none());
        assert!(NotificationId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.json").is_none());
        assert!(NotificationId::from_filename(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_none());
    }

    #[test]
    fn test_filename_parses_back() {
        let id = NotificationId::generate();
        assert_eq!(NotificationId::from_filename(&id.filename()), Some(id));
    }

    #[test]
    fn test_new_record_is_pending_and_due() {
        let now = Utc::now();
        let record = record(now);

        assert_eq!(record.status, ScheduleStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.max_retries, DEFAULT_MAX_RETRIES);
        assert!(record.is_due(now));
        assert!(!record.is_due(now - Duration::seconds(10)));
    }

    #[test]
    fn test_transition_is_conditional() {
        let now = Utc::now();
        let mut record = record(now);

        record
            .transition(ScheduleStatus::Pending, ScheduleStatus::Pending, 1, now)
            .unwrap();
        assert_eq!(record.retry_count, 1);

        record
            .transition(ScheduleStatus::Pending, ScheduleStatus::Sent, 1, now)
            .unwrap();
        assert_eq!(record.status, ScheduleStatus::Sent);

        let err = record
            .transition(ScheduleStatus::Pending, ScheduleStatus::Failed, 2, now)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: ScheduleStatus::Pending,
                actual: ScheduleStatus::Sent,
                ..
            }
        ));
        assert_eq!(record.retry_count, 1);
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let now = Utc::now();
        let mut record = record(now);

        record.cancel(now).unwrap();
        assert_eq!(record.status, ScheduleStatus::Cancelled);
        assert!(!record.is_due(now));
        assert!(record.cancel(now).is_err());
    }

    #[test]
    fn test_reschedule_resets_budget_but_not_sent() {
        let now = Utc::now();
        let mut record = record(now);

        record
            .transition(ScheduleStatus::Pending, ScheduleStatus::Failed, 3, now)
            .unwrap();
        let later = now + Duration::hours(1);
        record.reschedule(later, now).unwrap();
        assert_eq!(record.status, ScheduleStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.scheduled_for, later);

        record
            .transition(ScheduleStatus::Pending, ScheduleStatus::Sent, 0, now)
            .unwrap();
        assert!(matches!(
            record.reschedule(later, now),
            Err(StoreError::InvalidTransition {
                from: ScheduleStatus::Sent,
                ..
            })
        ));
    }

    #[test]
    fn test_select_due_orders_and_limits() {
        let now = Utc::now();
        let mut records: Vec<_> = (0..5)
            .map(|i| {
                let mut r = record(now);
                r.scheduled_for = now - Duration::seconds(i);
                r
            })
            .collect();
        records[0].scheduled_for = now + Duration::seconds(60);

        let due = select_due(records.iter(), now, 3);
        assert_eq!(due.len(), 3);
        assert!(due.windows(2).all(|w| w[0].scheduled_for <= w[1].scheduled_for));
        assert_eq!(due[0].scheduled_for, now - Duration::seconds(4));
    }
}
