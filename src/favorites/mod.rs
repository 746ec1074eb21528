//! The user's favorites collection.
//!
//! `FavoritesStore` is the only place favorites are mutated. Reads are
//! fail-soft: a missing, unreadable or malformed slot behaves like an empty
//! collection. Every mutation rewrites the whole slot, which is fine for a
//! personal list but does not scale to large collections.

mod storage;
mod watch;

pub use storage::{
    FileStorage, MemoryStorage, SlotWatch, Storage, StorageError, UnavailableStorage,
};
pub use watch::FavoritesWatcher;

use crate::models::Movie;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const FAVORITES_KEY: &str = "movie-finder-favorites";
const EVENT_CAPACITY: usize = 64;

/// Published after every successful write to the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum FavoritesEvent {
    Added { id: i64, title: String },
    Removed { id: i64 },
}

#[derive(Clone)]
pub struct FavoritesStore {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn Storage>,
    key: String,
    // Serializes read-modify-write within this process.
    write_lock: Mutex<()>,
    events: broadcast::Sender<FavoritesEvent>,
}

impl std::fmt::Debug for FavoritesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FavoritesStore")
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl FavoritesStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_key(storage, FAVORITES_KEY)
    }

    pub fn with_key(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                storage,
                key: key.into(),
                write_lock: Mutex::new(()),
                events,
            }),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// All favorites in storage order, or a distinguishable error when the
    /// slot cannot be read or decoded.
    pub fn try_list(&self) -> Result<Vec<Movie>, StorageError> {
        match self.inner.storage.read(&self.inner.key)? {
            None => Ok(Vec::new()),
            Some(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }

    pub fn list(&self) -> Vec<Movie> {
        match self.try_list() {
            Ok(list) => list,
            Err(e) => {
                warn!("Reading favorites failed, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    pub fn contains(&self, movie_id: i64) -> bool {
        self.list().iter().any(|m| m.id == movie_id)
    }

    /// Appends `movie` unless a record with the same id is already stored.
    pub fn add(&self, movie: Movie) {
        let _guard = self.lock();
        self.add_locked(self.list(), movie);
    }

    /// Drops `movie_id` and rewrites the slot, even when it was absent.
    pub fn remove(&self, movie_id: i64) {
        let _guard = self.lock();
        self.remove_locked(self.list(), movie_id);
    }

    /// Flips the favorite state of `movie` and returns the stored state
    /// afterwards, which is unchanged when the write was dropped.
    pub fn toggle(&self, movie: Movie) -> bool {
        let _guard = self.lock();
        let favorites = self.list();
        if favorites.iter().any(|m| m.id == movie.id) {
            !self.remove_locked(favorites, movie.id)
        } else {
            self.add_locked(favorites, movie)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FavoritesEvent> {
        self.inner.events.subscribe()
    }

    /// Notifications for writes to the slot made by other stores or
    /// processes. `None` when the backend cannot watch or watching failed.
    pub fn watch_slot(&self) -> Option<SlotWatch> {
        match self.inner.storage.watch(&self.inner.key) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Watching favorites failed, falling back to polling: {}", e);
                None
            }
        }
    }

    /// Returns whether `movie` is stored afterwards.
    fn add_locked(&self, mut favorites: Vec<Movie>, movie: Movie) -> bool {
        if favorites.iter().any(|m| m.id == movie.id) {
            debug!("Movie {} already in favorites", movie.id);
            return true;
        }
        let event = FavoritesEvent::Added {
            id: movie.id,
            title: movie.title.clone(),
        };
        info!("Adding '{}' ({}) to favorites", movie.title, movie.id);
        favorites.push(movie);
        let persisted = self.persist(&favorites);
        if persisted {
            self.publish(event);
        }
        persisted
    }

    /// Returns whether the rewrite was persisted.
    fn remove_locked(&self, mut favorites: Vec<Movie>, movie_id: i64) -> bool {
        favorites.retain(|m| m.id != movie_id);
        info!("Removing {} from favorites", movie_id);
        let persisted = self.persist(&favorites);
        if persisted {
            self.publish(FavoritesEvent::Removed { id: movie_id });
        }
        persisted
    }

    fn persist(&self, favorites: &[Movie]) -> bool {
        let serialized = match serde_json::to_string(favorites) {
            Ok(s) => s,
            Err(e) => {
                warn!("Serializing favorites failed: {}", e);
                return false;
            }
        };
        match self.inner.storage.write(&self.inner.key, &serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!("Writing favorites failed, change dropped: {}", e);
                false
            }
        }
    }

    fn publish(&self, event: FavoritesEvent) {
        // No subscribers is fine; watchers come and go.
        let _ = self.inner.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inception() -> Movie {
        let mut m = Movie::new(27205, "Inception");
        m.release_date = "2010-07-15".to_string();
        m.vote_average = 8.4;
        m
    }

    fn interstellar() -> Movie {
        Movie::new(157336, "Interstellar")
    }

    #[test]
    fn inception_interstellar_scenario() {
        let store = FavoritesStore::in_memory();
        assert!(store.list().is_empty());

        store.add(inception());
        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, 27205);

        store.add(interstellar());
        assert_eq!(store.list().len(), 2);
        assert!(store.contains(27205));
        assert!(store.contains(157336));

        store.remove(27205);
        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "Interstellar");
    }

    #[test]
    fn add_is_idempotent() {
        let store = FavoritesStore::in_memory();
        store.add(inception());
        let once = store.list();
        store.add(inception());
        assert_eq!(store.list(), once);
    }

    #[test]
    fn duplicate_add_keeps_first_record() {
        let store = FavoritesStore::in_memory();
        store.add(inception());
        let mut renamed = inception();
        renamed.title = "Inception (re-release)".to_string();
        store.add(renamed);
        assert_eq!(store.list()[0].title, "Inception");
    }

    #[test]
    fn remove_absent_leaves_collection_unchanged() {
        let store = FavoritesStore::in_memory();
        store.add(inception());
        let before = store.list();
        store.remove(42);
        assert_eq!(store.list(), before);
        assert!(!store.contains(42));
    }

    #[test]
    fn remove_on_empty_creates_empty_slot() {
        let storage = Arc::new(MemoryStorage::new());
        let store = FavoritesStore::new(storage.clone());
        store.remove(1);
        assert_eq!(storage.read(FAVORITES_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn preserves_insertion_order() {
        let store = FavoritesStore::in_memory();
        for id in [5, 3, 9, 1] {
            store.add(Movie::new(id, format!("m{id}")));
        }
        let ids: Vec<i64> = store.list().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 3, 9, 1]);
    }

    #[test]
    fn reload_from_same_slot_yields_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut detailed = interstellar();
        detailed.runtime = Some(169);
        detailed.poster_path = Some("/gEU2QniE6E77NI6lCU6MxlNBvIx.jpg".to_string());
        {
            let store = FavoritesStore::new(Arc::new(FileStorage::new(dir.path())));
            store.add(inception());
            store.add(detailed.clone());
        }
        let reopened = FavoritesStore::new(Arc::new(FileStorage::new(dir.path())));
        assert_eq!(reopened.list(), vec![inception(), detailed]);
    }

    #[test]
    fn malformed_slot_reads_as_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_raw(FAVORITES_KEY, "{not json");
        let store = FavoritesStore::new(storage);
        assert!(store.list().is_empty());
        assert!(!store.contains(27205));
        assert!(matches!(store.try_list(), Err(StorageError::Malformed(_))));
    }

    #[test]
    fn malformed_slot_is_overwritten_by_next_add() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_raw(FAVORITES_KEY, "null");
        let store = FavoritesStore::new(storage);
        store.add(inception());
        assert_eq!(store.try_list().unwrap(), vec![inception()]);
    }

    #[test]
    fn unavailable_storage_degrades_to_empty() {
        let store = FavoritesStore::new(Arc::new(UnavailableStorage));
        store.add(inception());
        assert!(store.list().is_empty());
        assert!(!store.contains(27205));
        store.remove(27205);
        assert!(matches!(store.try_list(), Err(StorageError::Unavailable)));
    }

    #[test]
    fn quota_exceeded_drops_the_change() {
        let store = FavoritesStore::new(Arc::new(MemoryStorage::with_quota(200)));
        store.add(Movie::new(1, "Short"));
        assert!(store.contains(1));
        let mut long = Movie::new(2, "Long");
        long.overview = "x".repeat(500);
        store.add(long);
        assert!(!store.contains(2));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn toggle_flips_state() {
        let store = FavoritesStore::in_memory();
        assert!(store.toggle(inception()));
        assert!(store.contains(27205));
        assert!(!store.toggle(inception()));
        assert!(!store.contains(27205));
    }

    #[test]
    fn toggle_reports_stored_state_when_write_is_dropped() {
        let store = FavoritesStore::new(Arc::new(UnavailableStorage));
        assert!(!store.toggle(inception()));
        assert!(!store.contains(27205));
    }

    #[test]
    fn publishes_events_for_successful_writes_only() {
        let store = FavoritesStore::in_memory();
        let mut rx = store.subscribe();
        store.add(inception());
        store.add(inception());
        store.remove(27205);

        assert_eq!(
            rx.try_recv().unwrap(),
            FavoritesEvent::Added {
                id: 27205,
                title: "Inception".to_string()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), FavoritesEvent::Removed { id: 27205 });
        assert!(rx.try_recv().is_err());

        let broken = FavoritesStore::new(Arc::new(UnavailableStorage));
        let mut rx = broken.subscribe();
        broken.add(inception());
        assert!(rx.try_recv().is_err());
    }
}
