use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tasklane_application::{ActivityFeedService, ActivityFilters, FeedHandle};
use tasklane_core::{AppError, AppResult};
use tasklane_domain::FeedKey;
use tokio::sync::RwLock;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub feed_service: ActivityFeedService,
    pub mounted_feeds: MountedFeeds,
    pub first_load_timeout: Duration,
}

impl AppState {
    pub fn new(feed_service: ActivityFeedService, first_load_timeout: Duration) -> Self {
        Self {
            feed_service,
            mounted_feeds: MountedFeeds::default(),
            first_load_timeout,
        }
    }
}

/// Feeds mounted through the gateway, keyed by project scope.
#[derive(Clone, Default)]
pub struct MountedFeeds {
    handles: Arc<RwLock<HashMap<FeedKey, Arc<FeedHandle>>>>,
}

impl MountedFeeds {
    /// Returns the handle for `key`, mounting the feed on first access.
    ///
    /// The flag is `true` when this call mounted it. `filters` only apply
    /// when it does.
    pub async fn get_or_mount(
        &self,
        service: &ActivityFeedService,
        key: FeedKey,
        filters: ActivityFilters,
    ) -> AppResult<(Arc<FeedHandle>, bool)> {
        if let Some(handle) = self.handles.read().await.get(&key) {
            return Ok((Arc::clone(handle), false));
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(&key) {
            return Ok((Arc::clone(handle), false));
        }

        let handle = Arc::new(service.mount_filtered(key.clone(), filters)?);
        handles.insert(key, Arc::clone(&handle));
        Ok((handle, true))
    }

    /// Returns the handle for an already mounted feed.
    pub async fn get(&self, key: &FeedKey) -> AppResult<Arc<FeedHandle>> {
        self.handles
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("feed {key} is not mounted")))
    }

    /// Unmounts `key` and waits for its teardown. Returns `false` when it was
    /// not mounted.
    ///
    /// Requests still holding the handle see `NotFound` from then on. The map
    /// stays locked until teardown finishes, so a concurrent first access
    /// mounts a fresh feed instead of conflicting with the old one.
    pub async fn unmount(&self, key: &FeedKey) -> bool {
        let mut handles = self.handles.write().await;
        let Some(handle) = handles.remove(key) else {
            return false;
        };

        handle.unmount().await;
        true
    }

    pub async fn count(&self) -> usize {
        self.handles.read().await.len()
    }

    /// Unmounts every feed.
    pub async fn clear(&self) {
        let mut handles = self.handles.write().await;
        let drained = handles.drain().map(|(_, handle)| handle).collect::<Vec<_>>();
        for handle in drained {
            handle.unmount().await;
        }
    }
}
