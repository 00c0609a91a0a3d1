use std::sync::Arc;

use tasklane_core::AppResult;
use tasklane_domain::FeedKey;
use tokio::sync::oneshot;
use tracing::info;

use crate::feed_ports::{ActivityFilters, ActivityTransport};
use crate::feed_store::FeedStore;
use crate::live_ingestor::LiveIngestor;

mod config;
mod driver;
mod handle;

pub use config::FeedConfig;
pub use handle::FeedHandle;

use driver::FeedDriver;

/// Activity feed synchronizer: mounts feeds, keeps them loaded and merges
/// live updates into them.
#[derive(Clone)]
pub struct ActivityFeedService {
    store: Arc<FeedStore>,
    ingestor: LiveIngestor,
    transport: Arc<dyn ActivityTransport>,
    config: FeedConfig,
}

impl ActivityFeedService {
    /// Creates a service over one transport.
    pub fn new(transport: Arc<dyn ActivityTransport>, config: FeedConfig) -> AppResult<Self> {
        config.validate()?;
        let store = Arc::new(FeedStore::new(Arc::clone(&transport)));

        Ok(Self {
            ingestor: LiveIngestor::new(Arc::clone(&store)),
            store,
            transport,
            config,
        })
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<FeedStore> {
        &self.store
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Mounts `key`: creates its state, loads the first page and keeps a live
    /// channel open until the returned handle is unmounted or dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&self, key: FeedKey) -> AppResult<FeedHandle> {
        self.mount_filtered(key, ActivityFilters::default())
    }

    /// Like [`Self::mount`], with every page request restricted by `filters`.
    ///
    /// Live deliveries are not filtered.
    pub fn mount_filtered(&self, key: FeedKey, filters: ActivityFilters) -> AppResult<FeedHandle> {
        let (mount_id, changes) = self.store.open(&key, filters)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = FeedDriver {
            key: key.clone(),
            store: Arc::clone(&self.store),
            ingestor: self.ingestor.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config,
        };
        let task = tokio::spawn(driver.run(shutdown_rx));

        info!(feed = %key, "activity feed mounted");
        Ok(FeedHandle::new(
            key,
            mount_id,
            Arc::clone(&self.store),
            self.config.page_limit,
            changes,
            shutdown_tx,
            task,
        ))
    }
}
