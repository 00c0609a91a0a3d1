//! Merge rules shared by page loads and live deliveries.
//!
//! `LogEntry::id` is the identity of an event regardless of how it arrived,
//! so applying the same batch twice is a no-op after the first time.

use std::collections::HashSet;

use crate::{FeedState, LogEntry, Pagination};

/// Result of folding a live batch into a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveMerge {
    /// Every delivered entry was already present.
    Unchanged,
    /// New entries were merged.
    Merged {
        /// Replacement snapshot.
        state: FeedState,
        /// Number of entries that were not present before.
        added: usize,
    },
}

/// Folds a live batch into `current`.
///
/// Unseen entries are combined with the existing ones and re-sorted newest
/// first. `total` grows by the number of new entries while `total_pages` and
/// `has_more` keep the last values reported by the backend.
#[must_use]
pub fn merge_live_batch(current: &FeedState, batch: &[LogEntry]) -> LiveMerge {
    let existing_ids = current.entry_ids();
    let mut batch_ids = HashSet::new();
    let unique_new = batch
        .iter()
        .filter(|entry| !existing_ids.contains(entry.id()) && batch_ids.insert(entry.id()))
        .cloned()
        .collect::<Vec<_>>();

    if unique_new.is_empty() {
        return LiveMerge::Unchanged;
    }

    let added = unique_new.len();
    let mut entries = unique_new;
    entries.extend(current.entries().iter().cloned());
    sort_newest_first(&mut entries);

    let pagination = current
        .pagination()
        .with_additional_total(u64::try_from(added).unwrap_or(u64::MAX));

    LiveMerge::Merged {
        state: FeedState::from_parts(entries, pagination),
        added,
    }
}

/// Appends a later page after the loaded entries.
///
/// Existing order is kept and the page is not re-sorted into it. Entries
/// already present are skipped. Returns the new state and the number of
/// appended entries.
#[must_use]
pub fn append_page(
    current: &FeedState,
    page_entries: Vec<LogEntry>,
    pagination: Pagination,
) -> (FeedState, usize) {
    let mut seen = current
        .entry_ids()
        .into_iter()
        .map(str::to_owned)
        .collect::<HashSet<_>>();
    let mut entries = current.entries().to_vec();
    let before = entries.len();

    for entry in page_entries {
        if seen.insert(entry.id().to_owned()) {
            entries.push(entry);
        }
    }

    let appended = entries.len() - before;
    (FeedState::from_parts(entries, pagination), appended)
}

/// Orders entries newest first. Equal timestamps keep no particular order.
pub fn sort_newest_first(entries: &mut [LogEntry]) {
    entries.sort_by(|left, right| right.created_at().cmp(&left.created_at()));
}

pub(crate) fn dedup_by_id(entries: Vec<LogEntry>) -> Vec<LogEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.id().to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use tasklane_core::NonEmptyString;

    use super::*;
    use crate::LogAction;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0)
            .single()
            .unwrap_or_else(|| unreachable!())
    }

    fn log(id: &str, seconds: i64) -> LogEntry {
        LogEntry::new(
            NonEmptyString::new(id).unwrap_or_else(|_| unreachable!()),
            LogAction::TaskUpdated,
            format!("entry {id}"),
            at(seconds),
        )
    }

    fn ids(state: &FeedState) -> Vec<&str> {
        state.entries().iter().map(LogEntry::id).collect()
    }

    fn state(entries: Vec<LogEntry>, total: u64) -> FeedState {
        FeedState::from_first_page(entries, Pagination::for_page(1, 20, total))
    }

    #[test]
    fn live_entry_is_inserted_by_timestamp() {
        let current = state(vec![log("a", 3), log("b", 1)], 2);

        let LiveMerge::Merged { state: merged, added } =
            merge_live_batch(&current, &[log("c", 2)])
        else {
            panic!("expected merge");
        };

        assert_eq!(added, 1);
        assert_eq!(ids(&merged), vec!["a", "c", "b"]);
        assert_eq!(merged.pagination().total, 3);
    }

    #[test]
    fn known_entry_leaves_state_unchanged() {
        let current = state(vec![log("a", 3), log("b", 1)], 2);
        assert_eq!(merge_live_batch(&current, &[log("a", 3)]), LiveMerge::Unchanged);
    }

    #[test]
    fn repeated_ids_inside_one_batch_count_once() {
        let current = state(vec![log("a", 3)], 1);

        let LiveMerge::Merged { state: merged, added } =
            merge_live_batch(&current, &[log("n", 9), log("n", 9)])
        else {
            panic!("expected merge");
        };

        assert_eq!(added, 1);
        assert_eq!(ids(&merged), vec!["n", "a"]);
        assert_eq!(merged.pagination().total, 2);
    }

    #[test]
    fn live_merge_keeps_page_counts() {
        let current = FeedState::from_first_page(
            vec![log("a", 3)],
            Pagination::for_page(1, 1, 2),
        );

        let LiveMerge::Merged { state: merged, .. } = merge_live_batch(&current, &[log("z", 10)])
        else {
            panic!("expected merge");
        };

        assert_eq!(merged.pagination().total_pages, 2);
        assert!(merged.pagination().has_more);
    }

    #[test]
    fn page_append_keeps_order_and_skips_known_ids() {
        let current = state(vec![log("a", 5), log("b", 4)], 4);

        let (appended, count) = append_page(
            &current,
            vec![log("b", 4), log("d", 1), log("c", 2)],
            Pagination::for_page(2, 2, 4),
        );

        assert_eq!(count, 2);
        assert_eq!(ids(&appended), vec!["a", "b", "d", "c"]);
        assert_eq!(appended.pagination().page, 2);
    }

    #[test]
    fn first_page_is_sorted_and_deduplicated() {
        let current = state(vec![log("b", 1), log("a", 3), log("b", 1)], 2);
        assert_eq!(ids(&current), vec!["a", "b"]);
    }

    fn arb_entries() -> impl Strategy<Value = Vec<LogEntry>> {
        prop::collection::vec(("[a-h]", 0_i64..50), 0..12).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(id, seconds)| log(id.as_str(), seconds))
                .collect()
        })
    }

    fn apply(current: &FeedState, batch: &[LogEntry]) -> FeedState {
        match merge_live_batch(current, batch) {
            LiveMerge::Unchanged => current.clone(),
            LiveMerge::Merged { state, .. } => state,
        }
    }

    proptest! {
        #[test]
        fn merging_the_same_batch_twice_is_idempotent(
            existing in arb_entries(),
            batch in arb_entries(),
        ) {
            let current = state(existing, 0);
            let once = apply(&current, &batch);
            prop_assert_eq!(merge_live_batch(&once, &batch), LiveMerge::Unchanged);
        }

        #[test]
        fn merged_entries_stay_newest_first_and_unique(
            existing in arb_entries(),
            batch in arb_entries(),
        ) {
            let merged = apply(&state(existing, 0), &batch);
            let entries = merged.entries();

            prop_assert!(entries
                .windows(2)
                .all(|pair| pair[0].created_at() >= pair[1].created_at()));
            prop_assert_eq!(merged.entry_ids().len(), entries.len());
        }

        #[test]
        fn live_merge_never_shrinks_the_feed(
            existing in arb_entries(),
            batch in arb_entries(),
        ) {
            let current = state(existing, 0);
            let merged = apply(&current, &batch);
            prop_assert!(merged.len() >= current.len());
            prop_assert_eq!(
                merged.pagination().total,
                u64::try_from(merged.len() - current.len()).unwrap_or(u64::MAX)
            );
        }
    }
}
