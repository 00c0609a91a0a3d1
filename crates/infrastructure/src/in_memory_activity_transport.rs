use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tasklane_application::{
    ActivityFilters, ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink,
    LiveDelivery, LiveSubscription,
};
use tasklane_core::{AppError, AppResult};
use tasklane_domain::{FeedKey, LogEntry, Pagination, sort_newest_first};
use tokio::sync::{RwLock, oneshot};
use tracing::debug;

#[derive(Default)]
struct FeedLog {
    entries: Vec<LogEntry>,
    subscribers: Vec<DeliverySink>,
}

/// In-memory activity backend for local runs and tests.
///
/// Entries are kept newest first and paginated the same way the GraphQL
/// backend does. Published entries are pushed to every live subscriber.
#[derive(Default)]
pub struct InMemoryActivityTransport {
    feeds: RwLock<HashMap<FeedKey, FeedLog>>,
    failing_fetches: AtomicUsize,
}

impl InMemoryActivityTransport {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores entries without notifying subscribers.
    pub async fn seed(&self, key: &FeedKey, entries: Vec<LogEntry>) {
        let mut feeds = self.feeds.write().await;
        let feed = feeds.entry(key.clone()).or_default();
        insert_entries(&mut feed.entries, entries);
    }

    /// Stores entries and pushes them as one batch to live subscribers.
    ///
    /// Returns how many subscribers received the batch.
    pub async fn publish(&self, key: &FeedKey, entries: Vec<LogEntry>) -> usize {
        let (subscribers, batch) = {
            let mut feeds = self.feeds.write().await;
            let feed = feeds.entry(key.clone()).or_default();
            let inserted = insert_entries(&mut feed.entries, entries);
            feed.subscribers.retain(|sink| !sink.is_closed());
            if inserted.is_empty() {
                return 0;
            }

            let total = u64::try_from(feed.entries.len()).unwrap_or(u64::MAX);
            let limit = u32::try_from(inserted.len()).unwrap_or(u32::MAX);
            let batch = json!({
                "logs": inserted,
                "pagination": Pagination::for_page(1, limit, total),
            });
            (feed.subscribers.clone(), batch)
        };

        let mut delivered = 0;
        for sink in subscribers {
            if sink.send(LiveDelivery::Batch(batch.clone())).await.is_ok() {
                delivered += 1;
            }
        }

        debug!(feed = %key, delivered, "published activity");
        delivered
    }

    /// Makes the next `count` page fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Ends every live subscription of `key` with `reason`.
    pub async fn disconnect_subscribers(&self, key: &FeedKey, reason: &str) -> usize {
        let subscribers = {
            let mut feeds = self.feeds.write().await;
            feeds
                .get_mut(key)
                .map(|feed| std::mem::take(&mut feed.subscribers))
                .unwrap_or_default()
        };

        let mut disconnected = 0;
        for sink in subscribers {
            if sink
                .send(LiveDelivery::Closed(Some(reason.to_owned())))
                .await
                .is_ok()
            {
                disconnected += 1;
            }
        }
        disconnected
    }

    /// Returns the number of open subscriptions for `key`.
    pub async fn subscriber_count(&self, key: &FeedKey) -> usize {
        self.feeds
            .read()
            .await
            .get(key)
            .map(|feed| feed.subscribers.iter().filter(|sink| !sink.is_closed()).count())
            .unwrap_or(0)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

fn insert_entries(stored: &mut Vec<LogEntry>, entries: Vec<LogEntry>) -> Vec<LogEntry> {
    let mut inserted = Vec::new();
    for entry in entries {
        let known = stored.iter().any(|existing| existing.id() == entry.id())
            || inserted
                .iter()
                .any(|existing: &LogEntry| existing.id() == entry.id());
        if !known {
            inserted.push(entry);
        }
    }

    stored.extend(inserted.iter().cloned());
    sort_newest_first(stored);
    sort_newest_first(&mut inserted);
    inserted
}

fn matches_filters(entry: &LogEntry, filters: Option<&ActivityFilters>) -> bool {
    let Some(filters) = filters else {
        return true;
    };

    let action_matches = filters
        .action
        .as_deref()
        .is_none_or(|action| entry.action().as_str() == action);
    let performer_matches = filters.performed_by.as_deref().is_none_or(|user_id| {
        entry
            .performed_by()
            .is_some_and(|performed_by| performed_by.id == user_id)
    });

    action_matches && performer_matches
}

#[async_trait]
impl ActivityTransport for InMemoryActivityTransport {
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
        if self.take_injected_failure() {
            return Err(AppError::Fetch("injected fetch failure".to_owned()));
        }

        let feeds = self.feeds.read().await;
        let matching: Vec<&LogEntry> = feeds
            .get(&query.key)
            .map(|feed| {
                feed.entries
                    .iter()
                    .filter(|entry| matches_filters(entry, query.filters.as_ref()))
                    .collect()
            })
            .unwrap_or_default();

        let limit = query.limit.max(1);
        let total = u64::try_from(matching.len()).unwrap_or(u64::MAX);
        let pagination = Pagination::for_page(query.page, limit, total);
        let skip = usize::try_from(u64::from(query.page.saturating_sub(1)) * u64::from(limit))
            .unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);

        Ok(ActivityPage {
            logs: matching.into_iter().skip(skip).take(take).cloned().collect(),
            pagination,
        })
    }

    async fn subscribe(&self, key: &FeedKey, sink: DeliverySink) -> AppResult<LiveSubscription> {
        self.feeds
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .subscribers
            .push(sink);

        let (close_tx, close_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = close_rx.await;
        });
        Ok(LiveSubscription::new(close_tx, task))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{TimeZone, Utc};
    use tasklane_application::{
        ActivityFilters, ActivityPageQuery, ActivityTransport, LiveDelivery, decode_live_batch,
    };
    use tasklane_core::{AppError, NonEmptyString, OrganizationId, ProjectId};
    use tasklane_domain::{FeedKey, LogAction, LogEntry, PerformedBy};
    use tokio::sync::mpsc;

    use super::InMemoryActivityTransport;

    pub(crate) fn key() -> FeedKey {
        FeedKey::new(
            OrganizationId::new("org-1").unwrap_or_else(|_| unreachable!()),
            ProjectId::new("project-1").unwrap_or_else(|_| unreachable!()),
        )
    }

    pub(crate) fn entry(id: &str, seconds: i64) -> LogEntry {
        LogEntry::new(
            NonEmptyString::new(id).unwrap_or_else(|_| unreachable!()),
            LogAction::TaskCreated,
            format!("created {id}"),
            Utc.timestamp_opt(1_700_000_000 + seconds, 0)
                .single()
                .unwrap_or_else(|| unreachable!()),
        )
    }

    fn ids(entries: &[LogEntry]) -> Vec<&str> {
        entries.iter().map(LogEntry::id).collect()
    }

    #[tokio::test]
    async fn pages_are_sliced_newest_first() {
        let transport = InMemoryActivityTransport::new();
        transport
            .seed(&key(), (0..5).map(|index| entry(&format!("log-{index}"), index)).collect())
            .await;

        let page = transport
            .fetch_page(ActivityPageQuery::new(key(), 2, 2))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(ids(&page.logs), vec!["log-2", "log-1"]);
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.pagination.has_more);
        assert!(page.pagination.has_previous);
    }

    #[tokio::test]
    async fn unknown_feed_returns_empty_first_page() {
        let transport = InMemoryActivityTransport::new();
        let page = transport
            .fetch_page(ActivityPageQuery::new(key(), 1, 20))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert!(page.logs.is_empty());
        assert_eq!(page.pagination.total, 0);
        assert!(!page.pagination.has_more);
    }

    #[tokio::test]
    async fn filters_restrict_entries() {
        let transport = InMemoryActivityTransport::new();
        let assigned = LogEntry::new(
            NonEmptyString::new("assigned").unwrap_or_else(|_| unreachable!()),
            LogAction::TaskAssigned,
            String::new(),
            Utc.timestamp_opt(1_700_000_100, 0)
                .single()
                .unwrap_or_else(|| unreachable!()),
        )
        .with_performed_by(PerformedBy {
            id: "user-7".to_owned(),
            name: Some("Grace".to_owned()),
            email: None,
        });
        transport
            .seed(&key(), vec![entry("created", 1), assigned])
            .await;

        let query = ActivityPageQuery::new(key(), 1, 20).with_filters(ActivityFilters {
            action: Some("TASK_ASSIGNED".to_owned()),
            performed_by: Some("user-7".to_owned()),
        });
        let page = transport
            .fetch_page(query)
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(ids(&page.logs), vec!["assigned"]);
        assert_eq!(page.pagination.total, 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let transport = InMemoryActivityTransport::new();
        transport.fail_next_fetches(1);

        assert!(matches!(
            transport.fetch_page(ActivityPageQuery::new(key(), 1, 20)).await,
            Err(AppError::Fetch(_))
        ));
        assert!(
            transport
                .fetch_page(ActivityPageQuery::new(key(), 1, 20))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn publish_pushes_only_new_entries() {
        let transport = InMemoryActivityTransport::new();
        transport.seed(&key(), vec![entry("a", 1)]).await;
        let (sink, mut deliveries) = mpsc::channel(4);
        let _subscription = transport
            .subscribe(&key(), sink)
            .await
            .unwrap_or_else(|_| unreachable!());

        let delivered = transport
            .publish(&key(), vec![entry("a", 1), entry("b", 2)])
            .await;
        assert_eq!(delivered, 1);

        let Some(LiveDelivery::Batch(batch)) = deliveries.recv().await else {
            panic!("expected a batch");
        };
        let entries = decode_live_batch(&batch).unwrap_or_else(|_| unreachable!());
        assert_eq!(ids(&entries), vec!["b"]);

        assert_eq!(transport.publish(&key(), vec![entry("b", 2)]).await, 0);
    }

    #[tokio::test]
    async fn disconnect_closes_subscribers() {
        let transport = InMemoryActivityTransport::new();
        let (sink, mut deliveries) = mpsc::channel(4);
        let _subscription = transport
            .subscribe(&key(), sink)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(transport.subscriber_count(&key()).await, 1);

        assert_eq!(transport.disconnect_subscribers(&key(), "maintenance").await, 1);
        assert_eq!(
            deliveries.recv().await,
            Some(LiveDelivery::Closed(Some("maintenance".to_owned())))
        );
        assert_eq!(transport.subscriber_count(&key()).await, 0);
    }
}
