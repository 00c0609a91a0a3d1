use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tasklane_application::{
    ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink, LiveDelivery,
    LiveSubscription,
};
use tasklane_core::AppResult;
use tasklane_domain::FeedKey;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Live channel derived from periodically re-fetching the first page.
///
/// Each poll is delivered as a batch; the ingestor drops what is already
/// loaded.
pub struct PollingActivityTransport {
    inner: Arc<dyn ActivityTransport>,
    interval: Duration,
    page_limit: u32,
}

impl PollingActivityTransport {
    /// Polls `inner` every `interval`, fetching `page_limit` entries.
    #[must_use]
    pub fn new(inner: Arc<dyn ActivityTransport>, interval: Duration, page_limit: u32) -> Self {
        Self {
            inner,
            interval: interval.max(Duration::from_millis(10)),
            page_limit: page_limit.max(1),
        }
    }
}

#[async_trait]
impl ActivityTransport for PollingActivityTransport {
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
        self.inner.fetch_page(query).await
    }

    async fn subscribe(&self, key: &FeedKey, sink: DeliverySink) -> AppResult<LiveSubscription> {
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(poll_first_page(
            Arc::clone(&self.inner),
            ActivityPageQuery::new(key.clone(), 1, self.page_limit),
            self.interval,
            sink,
            close_rx,
        ));

        debug!(feed = %key, interval_ms = self.interval.as_millis(), "activity polling started");
        Ok(LiveSubscription::new(close_tx, task))
    }
}

async fn poll_first_page(
    inner: Arc<dyn ActivityTransport>,
    query: ActivityPageQuery,
    interval: Duration,
    sink: DeliverySink,
    mut close_rx: oneshot::Receiver<()>,
) {
    // The subscriber reloads right after subscribing, so the first poll waits
    // one full interval.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => {
                debug!(feed = %query.key, "activity polling stopped");
                return;
            }

            _ = ticker.tick() => {}
        }

        let delivery = match inner.fetch_page(query.clone()).await {
            Ok(page) if page.logs.is_empty() => continue,
            Ok(page) => match serde_json::to_value(&page) {
                Ok(batch) => LiveDelivery::Batch(batch),
                Err(error) => LiveDelivery::Error(format!("failed to encode polled page: {error}")),
            },
            Err(error) => {
                warn!(feed = %query.key, error = %error, "activity poll failed");
                LiveDelivery::Error(error.to_string())
            }
        };

        if sink.send(delivery).await.is_err() {
            return;
        }
    }
}
