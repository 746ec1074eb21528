//! Named persistent slots backing the favorites collection.
//!
//! A slot holds one string value and is always read and written whole.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is not available in this context")]
    Unavailable,

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("storage quota exceeded ({needed} bytes > {quota} bytes)")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("stored favorites are malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("watching storage failed: {0}")]
    Watch(#[from] notify::Error),
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub trait Storage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Notifications for writes to `key` made outside this handle, e.g. by
    /// another process. `None` when the backend has no such writers.
    fn watch(&self, _key: &str) -> Result<Option<SlotWatch>, StorageError> {
        Ok(None)
    }
}

/// Change notifications for one slot. Dropping it stops the watch.
pub struct SlotWatch {
    _watcher: RecommendedWatcher,
    changes: mpsc::UnboundedReceiver<()>,
}

impl SlotWatch {
    /// Resolves once the slot changed; bursts are coalesced into one wakeup.
    /// Returns `false` when the underlying watcher is gone.
    pub async fn changed(&mut self) -> bool {
        if self.changes.recv().await.is_none() {
            return false;
        }
        while self.changes.try_recv().is_ok() {}
        true
    }
}

fn is_slot_event(event: &Event, slot_name: &OsString) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n == slot_name.as_os_str()).unwrap_or(false))
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// One `<key>.json` file per slot under `dir`. Several processes may share
/// the directory; the last completed write wins.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.slot_path(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.slot_path(key)?;
        fs::create_dir_all(&self.dir)?;
        // Readers in other processes must never observe a partial slot.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{key}.{}.{seq}.tmp", std::process::id()));
        if let Err(e) = fs::write(&tmp, value).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn watch(&self, key: &str) -> Result<Option<SlotWatch>, StorageError> {
        let path = self.slot_path(key)?;
        let slot_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        fs::create_dir_all(&self.dir)?;

        let (tx, changes) = mpsc::unbounded_channel();
        // Watch the directory: every write replaces the slot file by rename.
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Ok(event) = result {
                    if is_slot_event(&event, &slot_name) {
                        let _ = tx.send(());
                    }
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        Ok(Some(SlotWatch {
            _watcher: watcher,
            changes,
        }))
    }
}

/// Process-local slots, optionally capped at `quota` bytes per value.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Writes a raw value, bypassing the quota. Used to seed slots.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        validate_key(key)?;
        Ok(self.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        if let Some(quota) = self.quota {
            if value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    needed: value.len(),
                    quota,
                });
            }
        }
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Backend for contexts without storage access; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStorage;

impl Storage for UnavailableStorage {
    fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn write(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }
}
