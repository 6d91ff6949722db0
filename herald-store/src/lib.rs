pub mod backends;
pub mod config;
pub mod error;
pub mod preferences;
pub mod r#trait;
pub mod types;

pub use backends::{FilePreferenceStore, FileStore, MemoryPreferenceStore, MemoryStore};
pub use config::StoreConfig;
pub use error::{Result, SerializationError, StoreError};
pub use preferences::{
    BulkUpdateOutcome, ChannelPreferences, NotificationPreferences, PreferencesUpdate,
    WebhookPreferences,
};
pub use r#trait::{PreferenceStore, ScheduledStore};
pub use types::{
    DEFAULT_MAX_RETRIES, NewScheduledNotification, NotificationId, ScheduleStatus,
    ScheduledNotification,
};
