//! Domain entities and invariants for project activity feeds.

#![forbid(unsafe_code)]

mod activity;
mod feed;
mod pagination;
mod reconcile;
mod view;

pub use activity::{ActionTone, LogAction, LogDetails, LogEntry, PerformedBy};
pub use feed::{FeedKey, FeedState};
pub use pagination::Pagination;
pub use reconcile::{LiveMerge, append_page, merge_live_batch, sort_newest_first};
pub use view::{FeedView, PREVIEW_LIMIT};
