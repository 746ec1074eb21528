use super::{FavoritesStore, SlotWatch};
use crate::models::Movie;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A surface's cached view of the favorites.
///
/// Refreshed immediately on every mutation made through the same store, and
/// on every write the storage backend reports from other stores or
/// processes sharing the slot. The `poll_interval` re-read is a fallback for
/// backends that cannot watch and for missed notifications. Dropping the
/// watcher stops it.
pub struct FavoritesWatcher {
    snapshot: watch::Receiver<Vec<Movie>>,
    task: JoinHandle<()>,
}

impl FavoritesWatcher {
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: FavoritesStore, poll_interval: Duration) -> Self {
        // Subscribe before the first read so no write falls in between.
        let events = store.subscribe();
        let slot = store.watch_slot();
        let (tx, snapshot) = watch::channel(store.list());
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let task = tokio::spawn(run(store, events, slot, tx, poll_interval));
        Self { snapshot, task }
    }

    pub fn snapshot(&self) -> Vec<Movie> {
        self.snapshot.borrow().clone()
    }

    pub fn is_favorite(&self, movie_id: i64) -> bool {
        self.snapshot.borrow().iter().any(|m| m.id == movie_id)
    }

    pub fn len(&self) -> usize {
        self.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.borrow().is_empty()
    }

    /// Waits until the cached view differs from the last one seen.
    pub async fn changed(&mut self) -> bool {
        self.snapshot.changed().await.is_ok()
    }

    pub fn receiver(&self) -> watch::Receiver<Vec<Movie>> {
        self.snapshot.clone()
    }
}

impl Drop for FavoritesWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pending forever once the slot watch is gone.
async fn next_slot_change(slot: &mut Option<SlotWatch>) -> bool {
    match slot {
        Some(slot) => slot.changed().await,
        None => std::future::pending().await,
    }
}

async fn run(
    store: FavoritesStore,
    mut events: broadcast::Receiver<super::FavoritesEvent>,
    mut slot: Option<SlotWatch>,
    tx: watch::Sender<Vec<Movie>>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the snapshot is already fresh.
    ticker.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => debug!("Favorites changed ({:?}), refreshing view", event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Favorites watcher lagged by {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            alive = next_slot_change(&mut slot) => {
                if alive {
                    debug!("Favorites slot written elsewhere, refreshing view");
                } else {
                    debug!("Favorites slot watch ended, polling only");
                    slot = None;
                }
            }
            _ = ticker.tick() => {}
        }

        let current = store.list();
        tx.send_if_modified(|cached| {
            if *cached == current {
                false
            } else {
                *cached = current;
                true
            }
        });
        if tx.is_closed() {
            return;
        }
    }
}
