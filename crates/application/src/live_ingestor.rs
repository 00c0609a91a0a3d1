//! Live Update Ingestor: folds pushed or polled batches into the store.

use std::sync::Arc;

use serde_json::Value;
use tasklane_core::{AppError, AppResult};
use tasklane_domain::{FeedKey, LiveMerge, LogEntry, merge_live_batch};
use tracing::{debug, info, warn};

use crate::feed_store::FeedStore;

const MAX_MERGE_ATTEMPTS: usize = 3;

/// What happened to one live delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The payload was malformed, empty, or the feed is gone.
    Dropped,
    /// Every entry was already loaded.
    Duplicate,
    /// New entries were merged.
    Merged {
        /// Number of entries added.
        added: usize,
    },
    /// The cached state was missing or unreadable; the caller must reload.
    RefreshRequired,
}

/// Applies live deliveries to a [`FeedStore`].
///
/// The ingestor only reads snapshots and asks the store to swap them; it
/// never edits state in place.
#[derive(Clone)]
pub struct LiveIngestor {
    store: Arc<FeedStore>,
}

impl LiveIngestor {
    /// Creates an ingestor over `store`.
    #[must_use]
    pub fn new(store: Arc<FeedStore>) -> Self {
        Self { store }
    }

    /// Applies one delivery to `key`.
    pub fn ingest(&self, key: &FeedKey, payload: &Value) -> IngestOutcome {
        let batch = match decode_live_batch(payload) {
            Ok(batch) => batch,
            Err(error) => {
                warn!(feed = %key, error = %error, "dropping malformed live delivery");
                return IngestOutcome::Dropped;
            }
        };

        match self.merge(key, &batch) {
            Ok(outcome) => outcome,
            Err(AppError::NotFound(_)) => {
                debug!(feed = %key, "live delivery for unmounted feed ignored");
                IngestOutcome::Dropped
            }
            Err(error) => {
                warn!(
                    feed = %key,
                    error = %error,
                    "could not merge live delivery; falling back to refresh"
                );
                IngestOutcome::RefreshRequired
            }
        }
    }

    fn merge(&self, key: &FeedKey, batch: &[LogEntry]) -> AppResult<IngestOutcome> {
        for _ in 0..MAX_MERGE_ATTEMPTS {
            let Some(current) = self.store.current_state(key)? else {
                return Err(AppError::MergeInconsistency(format!(
                    "no cached state for feed {key}"
                )));
            };

            match merge_live_batch(&current, batch) {
                LiveMerge::Unchanged => {
                    debug!(feed = %key, delivered = batch.len(), "live delivery already known");
                    return Ok(IngestOutcome::Duplicate);
                }
                LiveMerge::Merged { state, added } => {
                    if self.store.replace_if_current(key, &current, state)?.is_some() {
                        info!(feed = %key, added, "merged live activity");
                        return Ok(IngestOutcome::Merged { added });
                    }
                }
            }
        }

        Err(AppError::MergeInconsistency(format!(
            "feed {key} kept changing while merging a live delivery"
        )))
    }
}

/// Extracts the entries of a live payload.
///
/// The payload must be an object with a non-empty `logs` array of valid
/// entries.
pub fn decode_live_batch(payload: &Value) -> AppResult<Vec<LogEntry>> {
    let logs = payload
        .get("logs")
        .ok_or_else(|| AppError::Validation("live payload has no 'logs' field".to_owned()))?;

    let entries = serde_json::from_value::<Vec<LogEntry>>(logs.clone())
        .map_err(|error| AppError::Validation(format!("live payload logs are invalid: {error}")))?;

    if entries.is_empty() {
        return Err(AppError::Validation(
            "live payload carries no entries".to_owned(),
        ));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tasklane_domain::LogEntry;

    use super::{IngestOutcome, LiveIngestor, decode_live_batch};
    use crate::feed_ports::ActivityFilters;
    use crate::feed_store::FeedStore;
    use crate::test_support::{FakeTransport, feed_key, log, page, wire_batch};

    async fn loaded_store(entries: Vec<LogEntry>, total: u64) -> Arc<FeedStore> {
        let transport = Arc::new(FakeTransport::default());
        transport.push_page(1, Ok(page(entries, 1, 20, total)));
        let store = Arc::new(FeedStore::new(transport));
        let key = feed_key();
        assert!(store.open(&key, ActivityFilters::default()).is_ok());
        assert!(store.reset(&key, 20).await.is_ok());
        store
    }

    fn entry_ids(store: &FeedStore) -> Vec<String> {
        store
            .current_state(&feed_key())
            .ok()
            .flatten()
            .map(|state| {
                state
                    .entries()
                    .iter()
                    .map(|entry| entry.id().to_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn new_entry_is_merged_in_timestamp_order() {
        let store = loaded_store(vec![log("a", 3), log("b", 1)], 2).await;
        let ingestor = LiveIngestor::new(Arc::clone(&store));

        let outcome = ingestor.ingest(&feed_key(), &wire_batch(&[log("c", 2)]));

        assert_eq!(outcome, IngestOutcome::Merged { added: 1 });
        assert_eq!(entry_ids(&store), vec!["a", "c", "b"]);
        let total = store
            .current_state(&feed_key())
            .ok()
            .flatten()
            .map(|state| state.pagination().total);
        assert_eq!(total, Some(3));
    }

    #[tokio::test]
    async fn duplicate_delivery_changes_nothing() {
        let store = loaded_store(vec![log("a", 3), log("b", 1)], 2).await;
        let ingestor = LiveIngestor::new(Arc::clone(&store));
        let before = store.current_state(&feed_key()).ok().flatten();

        let outcome = ingestor.ingest(&feed_key(), &wire_batch(&[log("a", 3)]));

        assert_eq!(outcome, IngestOutcome::Duplicate);
        let after = store.current_state(&feed_key()).ok().flatten();
        assert!(matches!((before, after), (Some(left), Some(right)) if Arc::ptr_eq(&left, &right)));
    }

    #[tokio::test]
    async fn same_batch_twice_is_applied_once() {
        let store = loaded_store(vec![log("a", 3)], 1).await;
        let ingestor = LiveIngestor::new(Arc::clone(&store));
        let batch = wire_batch(&[log("x", 9), log("y", 8)]);

        assert_eq!(
            ingestor.ingest(&feed_key(), &batch),
            IngestOutcome::Merged { added: 2 }
        );
        assert_eq!(ingestor.ingest(&feed_key(), &batch), IngestOutcome::Duplicate);
        assert_eq!(entry_ids(&store), vec!["x", "y", "a"]);
    }

    #[tokio::test]
    async fn cache_miss_requests_refresh_without_creating_state() {
        let store = Arc::new(FeedStore::new(Arc::new(FakeTransport::default())));
        assert!(store.open(&feed_key(), ActivityFilters::default()).is_ok());
        let ingestor = LiveIngestor::new(Arc::clone(&store));

        let outcome = ingestor.ingest(&feed_key(), &wire_batch(&[log("a", 1)]));

        assert_eq!(outcome, IngestOutcome::RefreshRequired);
        assert!(matches!(store.current_state(&feed_key()), Ok(None)));
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped() {
        let store = loaded_store(vec![log("a", 3)], 1).await;
        let ingestor = LiveIngestor::new(Arc::clone(&store));

        for payload in [
            json!(null),
            json!({ "logs": [] }),
            json!({ "entries": [] }),
            json!({ "logs": [{ "id": "q" }] }),
        ] {
            assert_eq!(ingestor.ingest(&feed_key(), &payload), IngestOutcome::Dropped);
        }
        assert_eq!(entry_ids(&store), vec!["a"]);
    }

    #[tokio::test]
    async fn delivery_for_closed_feed_is_dropped() {
        let store = Arc::new(FeedStore::new(Arc::new(FakeTransport::default())));
        let (mount_id, _changes) = store
            .open(&feed_key(), ActivityFilters::default())
            .unwrap_or_else(|_| unreachable!());
        let ingestor = LiveIngestor::new(Arc::clone(&store));
        assert!(store.close(&feed_key(), mount_id));

        let outcome = ingestor.ingest(&feed_key(), &wire_batch(&[log("b", 4)]));
        assert_eq!(outcome, IngestOutcome::Dropped);
    }

    #[test]
    fn decode_requires_logs_field() {
        assert!(decode_live_batch(&json!({ "pagination": {} })).is_err());
        assert!(decode_live_batch(&wire_batch(&[log("a", 1)])).is_ok());
    }
}
