use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    FilePreferenceStore, FileStore, MemoryPreferenceStore, MemoryStore,
    backends::file::PREFERENCES_FILE,
    r#trait::{PreferenceStore, ScheduledStore},
};

/// Configuration for the scheduled notification store
///
/// # Examples
///
/// File-backed store in RON config:
/// ```ron
/// Herald (
///     store: File(
///         path: "/var/lib/herald/scheduled",
///     ),
/// )
/// ```
///
/// Memory-backed store with a capacity limit:
/// ```ron
/// Herald (
///     store: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub enum StoreConfig {
    /// Records kept in process memory (lost on restart)
    Memory {
        /// Maximum number of records to hold (omit for unlimited)
        #[serde(default)]
        capacity: Option<usize>,
    },
    /// One file per record under `path`, preferences in `path/preferences.bin`
    File { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory { capacity: None }
    }
}

impl StoreConfig {
    /// Open the configured backend
    ///
    /// # Errors
    /// Returns an error if a file-backed store cannot be opened.
    pub async fn into_store(self) -> crate::Result<Arc<dyn ScheduledStore>> {
        match self {
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryStore::new()) as Arc<dyn ScheduledStore>,
                |capacity| Arc::new(MemoryStore::with_capacity(capacity)),
            )),
            Self::File { path } => Ok(Arc::new(FileStore::open(path).await?)),
        }
    }

    /// Open the preference store kept alongside the configured backend
    ///
    /// # Errors
    /// Returns an error if a file-backed preferences file cannot be read.
    pub async fn preference_store(&self) -> crate::Result<Arc<dyn PreferenceStore>> {
        match self {
            Self::Memory { .. } => Ok(Arc::new(MemoryPreferenceStore::new())),
            Self::File { path } => Ok(Arc::new(
                FilePreferenceStore::open(path.join(PREFERENCES_FILE)).await?,
            )),
        }
    }
}
