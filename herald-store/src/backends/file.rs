use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use herald_common::internal;
use herald_tracing::traced;
use tokio::{fs, sync::Mutex};

use crate::{
    NewScheduledNotification, NotificationId, ScheduleStatus, ScheduledNotification, StoreError,
    backends::memory::upsert_into,
    preferences::{BulkUpdateOutcome, NotificationPreferences, PreferencesUpdate},
    r#trait::{PreferenceStore, ScheduledStore},
    types::{select_due, sort_failed, sort_pending},
};

const TEMP_PREFIX: &str = ".tmp_";

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// File-backed store
///
/// Each record is persisted as `{ulid}.bin` (bincode) in a single directory,
/// and an in-memory index of every record is loaded when the store is opened.
/// Reads are served from the index; mutations are written through to disk
/// before the index is updated.
///
/// # Atomicity
/// Writes go to `.tmp_{ulid}.bin` first and are then renamed into place, so a
/// crash never leaves a half-written record behind. Leftover temporary files
/// are removed by [`FileStore::open`]. Mutations are serialised by a single
/// writer lock, which makes every conditional status update atomic.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    index: Arc<DashMap<NotificationId, ScheduledNotification>>,
    writer: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open (creating if needed) the store directory and load every record
    ///
    /// Files that are not valid record names are ignored.
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    /// - If a record file cannot be decoded
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(path = %path.as_ref().display())), timing(precision = "ms"))]
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        internal!("Opening scheduled notification store at {}", path.display());

        if !fs::try_exists(&path).await? {
            internal!("{} does not exist, creating...", path.display());
            fs::create_dir_all(&path).await?;
        } else if !fs::metadata(&path).await?.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("Expected {} to be a Directory, but it is not", path.display()),
            )));
        }

        let index = DashMap::new();
        let mut cleaned = 0;
        let mut entries = fs::read_dir(&path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
                continue;
            }

            if let Some(id) = NotificationId::from_filename(&filename) {
                let bytes = fs::read(entry.path()).await?;
                let (record, _): (ScheduledNotification, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode_config())?;

                if record.id != id {
                    internal!(
                        level = WARN,
                        "Record in {filename} carries id {}, skipping",
                        record.id
                    );
                    continue;
                }

                index.insert(id, record);
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from store"
            );
        }

        internal!(level = INFO, "Loaded {} scheduled notifications", index.len());

        Ok(Self {
            path,
            index: Arc::new(index),
            writer: Arc::default(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    async fn persist(&self, record: &ScheduledNotification) -> crate::Result<()> {
        let filename = record.id.filename();
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{filename}"));
        let final_path = self.path.join(&filename);

        let bytes = bincode::serde::encode_to_vec(record, bincode_config())?;
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &final_path).await?;

        Ok(())
    }

    async fn mutate(
        &self,
        id: &NotificationId,
        apply: impl FnOnce(&mut ScheduledNotification) -> crate::Result<()> + Send,
    ) -> crate::Result<ScheduledNotification> {
        let _guard = self.writer.lock().await;

        let mut record = self
            .index
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        apply(&mut record)?;
        self.persist(&record).await?;
        self.index.insert(id.clone(), record.clone());

        Ok(record)
    }

    fn collect_for_user(&self, user_id: &str, status: ScheduleStatus) -> Vec<ScheduledNotification> {
        self.index
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.status == status)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl ScheduledStore for FileStore {
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    async fn create(&self, new: NewScheduledNotification) -> crate::Result<ScheduledNotification> {
        let _guard = self.writer.lock().await;

        let record = new.into_record(Utc::now());
        self.persist(&record).await?;
        self.index.insert(record.id.clone(), record.clone());

        internal!(level = DEBUG, "Stored scheduled notification {}", record.id);

        Ok(record)
    }

    /// Records are written one by one; on failure the already written ones are removed again
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    async fn create_many(
        &self,
        news: Vec<NewScheduledNotification>,
    ) -> crate::Result<Vec<ScheduledNotification>> {
        let _guard = self.writer.lock().await;

        let now = Utc::now();
        let mut created: Vec<ScheduledNotification> = Vec::with_capacity(news.len());

        for new in news {
            let record = new.into_record(now);
            if let Err(err) = self.persist(&record).await {
                for written in &created {
                    let _ = fs::remove_file(self.path.join(written.id.filename())).await;
                }
                return Err(err);
            }
            created.push(record);
        }

        for record in &created {
            self.index.insert(record.id.clone(), record.clone());
        }

        Ok(created)
    }

    async fn get(&self, id: &NotificationId) -> crate::Result<ScheduledNotification> {
        self.index
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> crate::Result<Vec<ScheduledNotification>> {
        let snapshot: Vec<_> = self
            .index
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.value().clone())
            .collect();

        Ok(select_due(snapshot.iter(), now, limit))
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
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
        .await
    }

    async fn cancel(&self, id: &NotificationId) -> crate::Result<ScheduledNotification> {
        self.mutate(id, |record| record.cancel(Utc::now())).await
    }

    async fn reschedule(
        &self,
        id: &NotificationId,
        scheduled_for: DateTime<Utc>,
    ) -> crate::Result<ScheduledNotification> {
        self.mutate(id, |record| record.reschedule(scheduled_for, Utc::now()))
            .await
    }

    async fn pending_for_user(&self, user_id: &str) -> crate::Result<Vec<ScheduledNotification>> {
        let mut records = self.collect_for_user(user_id, ScheduleStatus::Pending);
        sort_pending(&mut records);
        Ok(records)
    }

    async fn failed_for_user(&self, user_id: &str) -> crate::Result<Vec<ScheduledNotification>> {
        let mut records = self.collect_for_user(user_id, ScheduleStatus::Failed);
        sort_failed(&mut records);
        Ok(records)
    }
}

/// Name of the preferences file inside a [`FileStore`] directory
pub const PREFERENCES_FILE: &str = "preferences.bin";

/// File-backed preference store
///
/// Every user's preferences live in one bincode file, loaded when the store is
/// opened and rewritten (temp file + rename) on every update.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
    preferences: Arc<Mutex<HashMap<String, NotificationPreferences>>>,
}

impl FilePreferenceStore {
    /// Open the preferences file at `path`, starting empty if it does not exist
    ///
    /// # Errors
    /// - If the parent directory cannot be created
    /// - If the file exists but cannot be read or decoded
    pub async fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let preferences = if fs::try_exists(&path).await? {
            let bytes = fs::read(&path).await?;
            let (preferences, _): (HashMap<String, NotificationPreferences>, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode_config())?;
            preferences
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            HashMap::new()
        };

        internal!(
            level = INFO,
            "Loaded notification preferences for {} users from {}",
            preferences.len(),
            path.display()
        );

        Ok(Self {
            path,
            preferences: Arc::new(Mutex::new(preferences)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(
        &self,
        preferences: &HashMap<String, NotificationPreferences>,
    ) -> crate::Result<()> {
        let filename = self.path.file_name().map_or_else(
            || PREFERENCES_FILE.to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        let temp_path = self.path.with_file_name(format!("{TEMP_PREFIX}{filename}"));

        let bytes = bincode::serde::encode_to_vec(preferences, bincode_config())?;
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, user_id: &str) -> crate::Result<Option<NotificationPreferences>> {
        Ok(self.preferences.lock().await.get(user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> crate::Result<NotificationPreferences> {
        update.validate()?;
        let mut preferences = self.preferences.lock().await;

        let mut next = preferences.clone();
        let (stored, _) = upsert_into(&mut next, user_id, update, Utc::now());
        self.persist(&next).await?;
        *preferences = next;

        Ok(stored)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    async fn upsert_many(
        &self,
        user_ids: &[String],
        update: &PreferencesUpdate,
    ) -> crate::Result<BulkUpdateOutcome> {
        update.validate()?;
        let mut preferences = self.preferences.lock().await;
        let now = Utc::now();

        let mut next = preferences.clone();
        let mut outcome = BulkUpdateOutcome::default();
        for user_id in user_ids {
            let (_, existed) = upsert_into(&mut next, user_id, update, now);
            outcome.count += 1;
            if existed {
                outcome.modified += 1;
            } else {
                outcome.upserted += 1;
            }
        }

        self.persist(&next).await?;
        *preferences = next;

        Ok(outcome)
    }
}
