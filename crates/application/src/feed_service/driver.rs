use std::sync::Arc;
use std::time::Duration;

use tasklane_domain::FeedKey;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::feed_ports::{ActivityTransport, LiveDelivery};
use crate::feed_store::FeedStore;
use crate::live_ingestor::{IngestOutcome, LiveIngestor};

use super::FeedConfig;

/// Exponential delay between resubscribe attempts.
struct ResubscribeBackoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl ResubscribeBackoff {
    fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms);
        Self {
            initial,
            max: Duration::from_millis(max_ms),
            next: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Background task of one mounted feed: keeps the live channel open,
/// applies deliveries in arrival order and reloads when a merge cannot
/// be applied or the channel was re-established.
pub(super) struct FeedDriver {
    pub(super) key: FeedKey,
    pub(super) store: Arc<FeedStore>,
    pub(super) ingestor: LiveIngestor,
    pub(super) transport: Arc<dyn ActivityTransport>,
    pub(super) config: FeedConfig,
}

impl FeedDriver {
    pub(super) async fn run(self, shutdown: oneshot::Receiver<()>) {
        tokio::select! {
            _ = shutdown => {
                debug!(feed = %self.key, "feed driver stopped");
            }
            () = self.drive() => {}
        }
    }

    async fn drive(&self) {
        let mut backoff = ResubscribeBackoff::new(
            self.config.resubscribe_initial_backoff_ms,
            self.config.resubscribe_max_backoff_ms,
        );
        let mut first_attempt = true;

        loop {
            let (sink, mut deliveries) = mpsc::channel(self.config.delivery_channel_capacity);
            let subscription = match self.transport.subscribe(&self.key, sink).await {
                Ok(subscription) => {
                    info!(feed = %self.key, "live channel subscribed");
                    Some(subscription)
                }
                Err(error) => {
                    warn!(feed = %self.key, error = %error, "live channel subscribe failed");
                    self.record_live_error(error.to_string());
                    None
                }
            };

            if first_attempt || subscription.is_some() {
                self.reload().await;
            }
            first_attempt = false;

            if let Some(subscription) = subscription {
                let reason = self.pump(&mut deliveries, &mut backoff).await;
                warn!(feed = %self.key, reason = %reason, "live channel ended");
                self.record_live_error(reason);
                subscription.unsubscribe().await;
            }

            let delay = backoff.next_delay();
            info!(
                feed = %self.key,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "resubscribing live channel"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn pump(
        &self,
        deliveries: &mut mpsc::Receiver<LiveDelivery>,
        backoff: &mut ResubscribeBackoff,
    ) -> String {
        while let Some(delivery) = deliveries.recv().await {
            match delivery {
                LiveDelivery::Batch(payload) => {
                    backoff.reset();
                    self.clear_live_error();
                    if self.ingestor.ingest(&self.key, &payload) == IngestOutcome::RefreshRequired {
                        self.reload().await;
                    }
                }
                LiveDelivery::Error(message) => {
                    warn!(feed = %self.key, error = %message, "live channel reported an error");
                    self.record_live_error(message);
                }
                LiveDelivery::Closed(reason) => {
                    return reason.unwrap_or_else(|| "live channel closed".to_owned());
                }
            }
        }

        "live channel dropped".to_owned()
    }

    async fn reload(&self) {
        // Failures are already recorded on the snapshot by the store.
        if let Err(error) = self.store.reset(&self.key, self.config.page_limit).await {
            debug!(feed = %self.key, error = %error, "feed reload failed");
        }
    }

    fn clear_live_error(&self) {
        if let Err(error) = self.store.set_live_error(&self.key, None) {
            debug!(feed = %self.key, error = %error, "could not clear live channel error");
        }
    }

    fn record_live_error(&self, message: String) {
        if let Err(error) = self.store.set_live_error(&self.key, Some(message)) {
            debug!(feed = %self.key, error = %error, "could not record live channel error");
        }
    }
}
