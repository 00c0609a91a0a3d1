use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tasklane_core::{AppError, AppResult};
use tasklane_domain::FeedKey;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::feed_store::{FeedSnapshot, FeedStore, LoadOutcome, MountId};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct DriverTask {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Consumer handle for one mounted feed.
///
/// Unmounting through any shared reference tears the feed down for every
/// holder; later calls fail with `NotFound`. Dropping the handle does the
/// same without waiting for the driver.
pub struct FeedHandle {
    key: FeedKey,
    mount_id: MountId,
    store: Arc<FeedStore>,
    page_limit: u32,
    changes: watch::Receiver<FeedSnapshot>,
    driver: Mutex<Option<DriverTask>>,
    closed: AtomicBool,
}

impl FeedHandle {
    pub(super) fn new(
        key: FeedKey,
        mount_id: MountId,
        store: Arc<FeedStore>,
        page_limit: u32,
        changes: watch::Receiver<FeedSnapshot>,
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            key,
            mount_id,
            store,
            page_limit,
            changes,
            driver: Mutex::new(Some(DriverTask { shutdown_tx, task })),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the feed scope.
    #[must_use]
    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    /// Returns whether the feed was unmounted.
    #[must_use]
    pub fn is_unmounted(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the latest snapshot without waiting.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        self.changes.borrow().clone()
    }

    /// Returns a receiver notified on every snapshot change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<FeedSnapshot> {
        self.changes.clone()
    }

    /// Loads the page after the last loaded one.
    pub async fn load_more(&self) -> AppResult<LoadOutcome> {
        self.ensure_mounted()?;
        let next_page = self
            .changes
            .borrow()
            .state
            .as_ref()
            .and_then(|state| state.pagination().next_page());

        match next_page {
            Some(page) => self.store.load(&self.key, page, self.page_limit).await,
            None => Ok(LoadOutcome::NoMorePages),
        }
    }

    /// Reloads the first page.
    pub async fn refresh(&self) -> AppResult<LoadOutcome> {
        self.ensure_mounted()?;
        info!(feed = %self.key, "manual activity refresh");
        self.store.reset(&self.key, self.page_limit).await
    }

    /// Flips between the preview and the full list; returns the new flag.
    pub fn toggle_show_all(&self) -> AppResult<bool> {
        self.ensure_mounted()?;
        self.store.toggle_show_all(&self.key)
    }

    /// Clears the live channel indicator.
    pub fn dismiss_live_error(&self) -> AppResult<()> {
        self.ensure_mounted()?;
        self.store.set_live_error(&self.key, None)
    }

    /// Stops the driver and removes the feed.
    ///
    /// Returns once the driver task has finished, so nothing it started can
    /// write into the feed afterwards. Later calls are no-ops.
    pub async fn unmount(&self) {
        self.closed.store(true, Ordering::Release);
        let Some(DriverTask {
            shutdown_tx,
            mut task,
        }) = self.take_driver()
        else {
            return;
        };

        let _ = shutdown_tx.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task)
            .await
            .is_err()
        {
            debug!(feed = %self.key, "feed driver did not stop in time; aborting");
            task.abort();
            let _ = task.await;
        }

        self.store.close(&self.key, self.mount_id);
        info!(feed = %self.key, "activity feed unmounted");
    }

    fn ensure_mounted(&self) -> AppResult<()> {
        if self.is_unmounted() {
            return Err(AppError::NotFound(format!(
                "feed {} is not mounted",
                self.key
            )));
        }
        Ok(())
    }

    fn take_driver(&self) -> Option<DriverTask> {
        match self.driver.lock() {
            Ok(mut driver) => driver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        let driver = match self.driver.get_mut() {
            Ok(driver) => driver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(DriverTask { shutdown_tx, task }) = driver {
            let _ = shutdown_tx.send(());
            task.abort();
        }
        self.store.close(&self.key, self.mount_id);
    }
}
