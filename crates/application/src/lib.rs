//! Application services and ports.

#![forbid(unsafe_code)]

mod feed_ports;
mod feed_service;
mod feed_store;
mod live_ingestor;

#[cfg(test)]
mod test_support;

pub use feed_ports::{
    ActivityFilters, ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink,
    LiveDelivery, LiveSubscription,
};
pub use feed_service::{ActivityFeedService, FeedConfig, FeedHandle};
pub use feed_store::{FeedSnapshot, FeedStore, LoadOutcome, MountId};
pub use live_ingestor::{IngestOutcome, LiveIngestor, decode_live_batch};
