//! Query Store: the authoritative paginated slice of each mounted feed.
//!
//! Every feed key owns one slot holding a `watch` channel of snapshots.
//! Loads carry a generation token so that a late response from a superseded
//! request is discarded instead of overwriting fresher state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tasklane_core::{AppError, AppResult};
use tasklane_domain::{FeedKey, FeedState, FeedView, append_page};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::feed_ports::{ActivityFilters, ActivityPage, ActivityPageQuery, ActivityTransport};

/// Consumer-visible state of one feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    /// Last successfully loaded state; `None` until the first load succeeds.
    pub state: Option<Arc<FeedState>>,
    /// Whether a load is in flight.
    pub loading: bool,
    /// Message of the last failed load, cleared by the next successful one.
    pub fetch_error: Option<String>,
    /// Message of the last live channel failure, until dismissed.
    pub live_error: Option<String>,
    /// Whether the expanded list is shown.
    pub show_all: bool,
}

impl FeedSnapshot {
    /// Projects the snapshot for display.
    #[must_use]
    pub fn view(&self) -> FeedView<'_> {
        FeedView::project(self.state.as_deref(), self.show_all)
    }
}

/// Result of a load that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The response was committed.
    Applied(Arc<FeedState>),
    /// A newer load started, or the feed was closed, before the response
    /// arrived. Nothing was changed.
    Superseded,
    /// There was no further page to load.
    NoMorePages,
}

/// Identity of one slot. A key that is closed and opened again gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountId(u64);

struct FeedSlot {
    snapshot_tx: watch::Sender<FeedSnapshot>,
    mount_id: MountId,
    generation: u64,
    filters: ActivityFilters,
}

/// Keyed store of feed snapshots.
pub struct FeedStore {
    transport: Arc<dyn ActivityTransport>,
    slots: RwLock<HashMap<FeedKey, FeedSlot>>,
    // Shared by mount ids and load generations so neither repeats across remounts.
    sequence: AtomicU64,
}

impl FeedStore {
    /// Creates an empty store backed by `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn ActivityTransport>) -> Self {
        Self {
            transport,
            slots: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates the slot for `key` and returns its identity together with a
    /// receiver of its snapshots.
    ///
    /// Every page request of the slot carries `filters`.
    pub fn open(
        &self,
        key: &FeedKey,
        filters: ActivityFilters,
    ) -> AppResult<(MountId, watch::Receiver<FeedSnapshot>)> {
        let mut slots = self.write_slots()?;
        if slots.contains_key(key) {
            return Err(AppError::Conflict(format!("feed {key} is already mounted")));
        }

        let mount_id = MountId(self.next_sequence());
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::default());
        slots.insert(
            key.clone(),
            FeedSlot {
                snapshot_tx,
                mount_id,
                generation: 0,
                filters,
            },
        );

        Ok((mount_id, snapshot_rx))
    }

    /// Drops the slot for `key` if it is still the one identified by `mount_id`.
    /// Pending loads for it become no-ops.
    pub fn close(&self, key: &FeedKey, mount_id: MountId) -> bool {
        let mut slots = match self.slots.write() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };

        if slots
            .get(key)
            .is_none_or(|slot| slot.mount_id != mount_id)
        {
            return false;
        }
        slots.remove(key).is_some()
    }

    /// Returns whether `key` has a slot.
    #[must_use]
    pub fn is_open(&self, key: &FeedKey) -> bool {
        self.read_slots()
            .map(|slots| slots.contains_key(key))
            .unwrap_or(false)
    }

    /// Returns the number of open slots.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.read_slots().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Returns the current snapshot without waiting.
    pub fn snapshot(&self, key: &FeedKey) -> AppResult<FeedSnapshot> {
        let slots = self.read_slots()?;
        let slot = slots.get(key).ok_or_else(|| not_mounted(key))?;
        Ok(slot.snapshot_tx.borrow().clone())
    }

    /// Returns the current feed state, `None` while nothing has loaded yet.
    pub fn current_state(&self, key: &FeedKey) -> AppResult<Option<Arc<FeedState>>> {
        let slots = self.read_slots()?;
        let slot = slots.get(key).ok_or_else(|| not_mounted(key))?;
        Ok(slot.snapshot_tx.borrow().state.clone())
    }

    /// Returns a fresh receiver of snapshots for `key`.
    pub fn watch(&self, key: &FeedKey) -> AppResult<watch::Receiver<FeedSnapshot>> {
        let slots = self.read_slots()?;
        let slot = slots.get(key).ok_or_else(|| not_mounted(key))?;
        Ok(slot.snapshot_tx.subscribe())
    }

    /// Loads `page` of `key`.
    ///
    /// Page 1 replaces the loaded entries; later pages are appended. On
    /// failure the previous state is kept and the error is recorded on the
    /// snapshot as well as returned.
    pub async fn load(&self, key: &FeedKey, page: u32, limit: u32) -> AppResult<LoadOutcome> {
        let (generation, filters) = self.begin_load(key)?;
        let result = self
            .transport
            .fetch_page(ActivityPageQuery::new(key.clone(), page, limit).with_filters(filters))
            .await;

        self.finish_load(key, generation, page, result)
    }

    /// Reloads the first page, discarding appended pages.
    pub async fn reset(&self, key: &FeedKey, limit: u32) -> AppResult<LoadOutcome> {
        self.load(key, 1, limit).await
    }

    /// Commits `next` only if the feed still holds `expected`.
    ///
    /// Returns `None` when the state moved on in between.
    pub fn replace_if_current(
        &self,
        key: &FeedKey,
        expected: &Arc<FeedState>,
        next: FeedState,
    ) -> AppResult<Option<Arc<FeedState>>> {
        let slots = self.read_slots()?;
        let slot = slots.get(key).ok_or_else(|| not_mounted(key))?;

        let next = Arc::new(next);
        let committed = slot.snapshot_tx.send_if_modified(|snapshot| {
            let is_current = snapshot
                .state
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, expected));
            if is_current {
                snapshot.state = Some(Arc::clone(&next));
            }
            is_current
        });

        Ok(committed.then_some(next))
    }

    /// Records or clears the live channel indicator.
    pub fn set_live_error(&self, key: &FeedKey, message: Option<String>) -> AppResult<()> {
        let slots = self.read_slots()?;
        let slot = slots.get(key).ok_or_else(|| not_mounted(key))?;
        slot.snapshot_tx.send_if_modified(|snapshot| {
            if snapshot.live_error == message {
                return false;
            }
            snapshot.live_error = message;
            true
        });
        Ok(())
    }

    /// Flips the expanded-list flag and returns the new value.
    pub fn toggle_show_all(&self, key: &FeedKey) -> AppResult<bool> {
        let slots = self.read_slots()?;
        let slot = slots.get(key).ok_or_else(|| not_mounted(key))?;
        let mut show_all = false;
        slot.snapshot_tx.send_modify(|snapshot| {
            snapshot.show_all = !snapshot.show_all;
            show_all = snapshot.show_all;
        });
        Ok(show_all)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn begin_load(&self, key: &FeedKey) -> AppResult<(u64, ActivityFilters)> {
        let generation = self.next_sequence();
        let mut slots = self.write_slots()?;
        let slot = slots.get_mut(key).ok_or_else(|| not_mounted(key))?;
        slot.generation = generation;
        slot.snapshot_tx.send_if_modified(|snapshot| {
            let changed = !snapshot.loading;
            snapshot.loading = true;
            changed
        });
        Ok((generation, slot.filters.clone()))
    }

    fn finish_load(
        &self,
        key: &FeedKey,
        generation: u64,
        page: u32,
        result: AppResult<ActivityPage>,
    ) -> AppResult<LoadOutcome> {
        let slots = self.read_slots()?;
        let Some(slot) = slots.get(key) else {
            debug!(feed = %key, page, "feed closed before load completed; response discarded");
            return Ok(LoadOutcome::Superseded);
        };

        if slot.generation != generation {
            debug!(
                feed = %key,
                page,
                generation,
                latest_generation = slot.generation,
                "stale load response discarded"
            );
            return Ok(LoadOutcome::Superseded);
        }

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(error) => {
                warn!(feed = %key, page, error = %error, "activity page load failed");
                slot.snapshot_tx.send_modify(|snapshot| {
                    snapshot.loading = false;
                    snapshot.fetch_error = Some(error.to_string());
                });
                return Err(error);
            }
        };

        // The append is built from the state held under the channel lock, so
        // a live merge committed while the page was in flight is kept.
        let mut applied = None;
        slot.snapshot_tx.send_modify(|snapshot| {
            let next = match snapshot.state.as_deref() {
                Some(current) if page > 1 => {
                    let (next, appended) = append_page(current, fetched.logs, fetched.pagination);
                    debug!(feed = %key, page, appended, "appended activity page");
                    next
                }
                _ => FeedState::from_first_page(fetched.logs, fetched.pagination),
            };

            let next = Arc::new(next);
            snapshot.state = Some(Arc::clone(&next));
            snapshot.loading = false;
            snapshot.fetch_error = None;
            applied = Some(next);
        });

        Ok(applied.map_or(LoadOutcome::Superseded, LoadOutcome::Applied))
    }

    fn read_slots(&self) -> AppResult<RwLockReadGuard<'_, HashMap<FeedKey, FeedSlot>>> {
        self.slots
            .read()
            .map_err(|_| AppError::Internal("feed store lock poisoned".to_owned()))
    }

    fn write_slots(&self) -> AppResult<RwLockWriteGuard<'_, HashMap<FeedKey, FeedSlot>>> {
        self.slots
            .write()
            .map_err(|_| AppError::Internal("feed store lock poisoned".to_owned()))
    }
}

fn not_mounted(key: &FeedKey) -> AppError {
    AppError::NotFound(format!("feed {key} is not mounted"))
}
