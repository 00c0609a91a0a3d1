use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tasklane_application::{
    ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink, LiveDelivery,
    LiveSubscription,
};
use tasklane_core::AppResult;
use tasklane_domain::FeedKey;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

type FailureCounts = Arc<Mutex<HashMap<FeedKey, u32>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Push,
    Polling,
}

struct Upstream {
    channel: Channel,
    subscription: LiveSubscription,
    deliveries: mpsc::Receiver<LiveDelivery>,
}

/// Live channel that prefers `push` and degrades to `poll`.
///
/// After `failure_threshold` consecutive push subscribe failures or closes
/// for a feed, its next subscription polls instead. A polling subscription
/// retries push every `push_retry_interval` and switches back in place on
/// the first success. Page requests always go to `push`.
pub struct FallbackActivityTransport {
    push: Arc<dyn ActivityTransport>,
    poll: Arc<dyn ActivityTransport>,
    failure_threshold: u32,
    push_retry_interval: Duration,
    push_failures: FailureCounts,
}

impl FallbackActivityTransport {
    /// Combines a push transport with a polling one.
    #[must_use]
    pub fn new(
        push: Arc<dyn ActivityTransport>,
        poll: Arc<dyn ActivityTransport>,
        failure_threshold: u32,
        push_retry_interval: Duration,
    ) -> Self {
        Self {
            push,
            poll,
            failure_threshold: failure_threshold.max(1),
            push_retry_interval: push_retry_interval.max(Duration::from_millis(10)),
            push_failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn spawn_relay(
        &self,
        key: &FeedKey,
        sink: DeliverySink,
        upstream: Upstream,
    ) -> LiveSubscription {
        let (close_tx, close_rx) = oneshot::channel();
        let relay = Relay {
            key: key.clone(),
            push: Arc::clone(&self.push),
            push_failures: Arc::clone(&self.push_failures),
            push_retry_interval: self.push_retry_interval,
            sink,
        };
        let task = tokio::spawn(relay.run(upstream, close_rx));
        LiveSubscription::new(close_tx, task)
    }
}

#[async_trait]
impl ActivityTransport for FallbackActivityTransport {
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
        self.push.fetch_page(query).await
    }

    async fn subscribe(&self, key: &FeedKey, sink: DeliverySink) -> AppResult<LiveSubscription> {
        let capacity = sink.max_capacity();

        if push_failures(&self.push_failures, key) < self.failure_threshold {
            let (push_tx, push_rx) = mpsc::channel(capacity);
            match self.push.subscribe(key, push_tx).await {
                Ok(subscription) => {
                    let upstream = Upstream {
                        channel: Channel::Push,
                        subscription,
                        deliveries: push_rx,
                    };
                    return Ok(self.spawn_relay(key, sink, upstream));
                }
                Err(error) => {
                    let failures = record_push_failure(&self.push_failures, key);
                    if failures < self.failure_threshold {
                        return Err(error);
                    }
                    warn!(
                        feed = %key,
                        failures,
                        error = %error,
                        "push channel keeps failing; falling back to polling"
                    );
                }
            }
        }

        let (poll_tx, poll_rx) = mpsc::channel(capacity);
        let subscription = self.poll.subscribe(key, poll_tx).await?;
        info!(feed = %key, "activity feed degraded to polling");
        Ok(self.spawn_relay(
            key,
            sink,
            Upstream {
                channel: Channel::Polling,
                subscription,
                deliveries: poll_rx,
            },
        ))
    }
}

struct Relay {
    key: FeedKey,
    push: Arc<dyn ActivityTransport>,
    push_failures: FailureCounts,
    push_retry_interval: Duration,
    sink: DeliverySink,
}

impl Relay {
    async fn run(self, mut upstream: Upstream, mut close_rx: oneshot::Receiver<()>) {
        let mut retry = tokio::time::interval_at(
            tokio::time::Instant::now() + self.push_retry_interval,
            self.push_retry_interval,
        );
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut close_rx => {
                    upstream.subscription.unsubscribe().await;
                    return;
                }

                delivery = upstream.deliveries.recv() => {
                    let delivery = delivery
                        .unwrap_or_else(|| LiveDelivery::Closed(Some("live channel dropped".to_owned())));
                    let closed = matches!(delivery, LiveDelivery::Closed(_));
                    if upstream.channel == Channel::Push {
                        match &delivery {
                            LiveDelivery::Batch(_) => reset_push_failures(&self.push_failures, &self.key),
                            LiveDelivery::Closed(_) => {
                                record_push_failure(&self.push_failures, &self.key);
                            }
                            LiveDelivery::Error(_) => {}
                        }
                    }

                    if self.sink.send(delivery).await.is_err() || closed {
                        return;
                    }
                }

                _ = retry.tick(), if upstream.channel == Channel::Polling => {
                    self.retry_push(&mut upstream).await;
                }
            }
        }
    }

    async fn retry_push(&self, upstream: &mut Upstream) {
        let (push_tx, push_rx) = mpsc::channel(self.sink.max_capacity());
        match self.push.subscribe(&self.key, push_tx).await {
            Ok(subscription) => {
                reset_push_failures(&self.push_failures, &self.key);
                let polling = std::mem::replace(
                    upstream,
                    Upstream {
                        channel: Channel::Push,
                        subscription,
                        deliveries: push_rx,
                    },
                );
                polling.subscription.unsubscribe().await;
                info!(feed = %self.key, "push channel restored; polling stopped");
            }
            Err(error) => {
                debug!(feed = %self.key, error = %error, "push channel still unavailable");
            }
        }
    }
}

fn push_failures(counts: &FailureCounts, key: &FeedKey) -> u32 {
    counts
        .lock()
        .map(|counts| counts.get(key).copied().unwrap_or(0))
        .unwrap_or(0)
}

fn record_push_failure(counts: &FailureCounts, key: &FeedKey) -> u32 {
    let Ok(mut counts) = counts.lock() else {
        return 0;
    };
    let failures = counts.entry(key.clone()).or_insert(0);
    *failures = failures.saturating_add(1);
    *failures
}

fn reset_push_failures(counts: &FailureCounts, key: &FeedKey) {
    if let Ok(mut counts) = counts.lock() {
        counts.remove(key);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tasklane_application::{
        ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink, LiveDelivery,
        LiveSubscription, decode_live_batch,
    };
    use tasklane_core::{AppError, AppResult};
    use tasklane_domain::FeedKey;
    use tokio::sync::mpsc;

    use super::FallbackActivityTransport;
    use crate::in_memory_activity_transport::tests::{entry, key};
    use crate::{InMemoryActivityTransport, PollingActivityTransport};

    /// Push channel over the in-memory backend that refuses a number of
    /// subscribe attempts first.
    pub(crate) struct RefusingPush {
        backend: Arc<InMemoryActivityTransport>,
        refusals: AtomicUsize,
    }

    impl RefusingPush {
        pub(crate) fn new(backend: Arc<InMemoryActivityTransport>, refusals: usize) -> Self {
            Self {
                backend,
                refusals: AtomicUsize::new(refusals),
            }
        }

        pub(crate) fn refuse_next(&self, refusals: usize) {
            self.refusals.store(refusals, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ActivityTransport for RefusingPush {
        async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
            self.backend.fetch_page(query).await
        }

        async fn subscribe(
            &self,
            key: &FeedKey,
            sink: DeliverySink,
        ) -> AppResult<LiveSubscription> {
            let refused = self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                    remaining.checked_sub(1)
                })
                .is_ok();
            if refused {
                return Err(AppError::LiveChannel("websocket handshake refused".to_owned()));
            }
            self.backend.subscribe(key, sink).await
        }
    }

    fn fallback(
        backend: &Arc<InMemoryActivityTransport>,
        push: &Arc<RefusingPush>,
        poll_interval: Duration,
        failure_threshold: u32,
        push_retry_interval: Duration,
    ) -> FallbackActivityTransport {
        let poll = PollingActivityTransport::new(
            Arc::clone(backend) as Arc<dyn ActivityTransport>,
            poll_interval,
            20,
        );
        FallbackActivityTransport::new(
            Arc::clone(push) as Arc<dyn ActivityTransport>,
            Arc::new(poll),
            failure_threshold,
            push_retry_interval,
        )
    }

    async fn next_delivery(deliveries: &mut mpsc::Receiver<LiveDelivery>) -> Option<LiveDelivery> {
        tokio::time::timeout(Duration::from_secs(2), deliveries.recv())
            .await
            .ok()
            .flatten()
    }

    fn batch_ids(delivery: Option<LiveDelivery>) -> Vec<String> {
        let Some(LiveDelivery::Batch(batch)) = delivery else {
            panic!("expected a batch, got {delivery:?}");
        };
        decode_live_batch(&batch)
            .unwrap_or_else(|_| unreachable!())
            .iter()
            .map(|entry| entry.id().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn repeated_push_failures_switch_to_polling() {
        let backend = Arc::new(InMemoryActivityTransport::new());
        backend.seed(&key(), vec![entry("a", 1)]).await;
        let push = Arc::new(RefusingPush::new(Arc::clone(&backend), usize::MAX));
        let transport = fallback(
            &backend,
            &push,
            Duration::from_millis(10),
            2,
            Duration::from_secs(60),
        );

        let (first_sink, _first_deliveries) = mpsc::channel(4);
        assert!(matches!(
            transport.subscribe(&key(), first_sink).await,
            Err(AppError::LiveChannel(_))
        ));

        let (sink, mut deliveries) = mpsc::channel(4);
        let subscription = transport.subscribe(&key(), sink).await;
        assert!(subscription.is_ok());
        assert_eq!(batch_ids(next_delivery(&mut deliveries).await), vec!["a"]);
    }

    #[tokio::test]
    async fn closed_push_channels_count_towards_fallback() {
        let backend = Arc::new(InMemoryActivityTransport::new());
        backend.seed(&key(), vec![entry("a", 1)]).await;
        let push = Arc::new(RefusingPush::new(Arc::clone(&backend), 0));
        let transport = fallback(
            &backend,
            &push,
            Duration::from_millis(10),
            1,
            Duration::from_secs(60),
        );

        let (sink, mut deliveries) = mpsc::channel(4);
        let _pushed = transport.subscribe(&key(), sink).await;
        assert_eq!(backend.disconnect_subscribers(&key(), "socket reset").await, 1);
        assert_eq!(
            next_delivery(&mut deliveries).await,
            Some(LiveDelivery::Closed(Some("socket reset".to_owned())))
        );

        push.refuse_next(usize::MAX);
        let (sink, mut deliveries) = mpsc::channel(4);
        let _polled = transport.subscribe(&key(), sink).await;
        assert_eq!(batch_ids(next_delivery(&mut deliveries).await), vec!["a"]);
        assert_eq!(backend.subscriber_count(&key()).await, 0);
    }

    #[tokio::test]
    async fn polling_switches_back_once_push_accepts() {
        let backend = Arc::new(InMemoryActivityTransport::new());
        let push = Arc::new(RefusingPush::new(Arc::clone(&backend), 1));
        let transport = fallback(
            &backend,
            &push,
            Duration::from_secs(60),
            1,
            Duration::from_millis(20),
        );

        let (sink, mut deliveries) = mpsc::channel(4);
        let subscription = transport.subscribe(&key(), sink).await;
        assert!(subscription.is_ok());

        let restored = tokio::time::timeout(Duration::from_secs(2), async {
            while backend.subscriber_count(&key()).await == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await;
        assert!(restored.is_ok(), "push channel was not restored");

        assert_eq!(backend.publish(&key(), vec![entry("b", 2)]).await, 1);
        assert_eq!(batch_ids(next_delivery(&mut deliveries).await), vec!["b"]);
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_upstream_channel() {
        let backend = Arc::new(InMemoryActivityTransport::new());
        let push = Arc::new(RefusingPush::new(Arc::clone(&backend), 0));
        let transport = fallback(
            &backend,
            &push,
            Duration::from_secs(60),
            3,
            Duration::from_secs(60),
        );

        let (sink, mut deliveries) = mpsc::channel(4);
        let subscription = transport
            .subscribe(&key(), sink)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(backend.subscriber_count(&key()).await, 1);

        subscription.unsubscribe().await;
        assert_eq!(backend.subscriber_count(&key()).await, 0);
        assert_eq!(next_delivery(&mut deliveries).await, None);
    }
}
