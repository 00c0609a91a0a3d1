use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tasklane_core::AppResult;
use tasklane_domain::FeedKey;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{ActivityPage, ActivityPageQuery};

const UNSUBSCRIBE_GRACE: Duration = Duration::from_secs(2);

/// Message pushed by a live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveDelivery {
    /// Raw batch payload, expected to hold `{ logs, pagination }`.
    Batch(Value),
    /// Transient channel failure; the channel keeps running.
    Error(String),
    /// The channel ended, with an optional reason.
    Closed(Option<String>),
}

/// Sender half handed to a transport when subscribing.
pub type DeliverySink = mpsc::Sender<LiveDelivery>;

/// Handle that keeps a live channel open.
///
/// Dropping the handle stops the background task.
#[derive(Debug)]
pub struct LiveSubscription {
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LiveSubscription {
    /// Wraps the close signal and the background task of one channel.
    #[must_use]
    pub fn new(close_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            close_tx: Some(close_tx),
            task: Some(task),
        }
    }

    /// Returns whether the background task already stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signals the channel to close and waits briefly for it to stop.
    pub async fn unsubscribe(mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }

        if let Some(mut task) = self.task.take()
            && tokio::time::timeout(UNSUBSCRIBE_GRACE, &mut task)
                .await
                .is_err()
        {
            task.abort();
        }
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Port to the activity backend.
///
/// Push subscriptions and polled re-fetches implement the same contract.
#[async_trait]
pub trait ActivityTransport: Send + Sync {
    /// Fetches one page of a feed.
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage>;

    /// Opens a live channel for `key` that pushes into `sink` until the
    /// returned handle is dropped or unsubscribed.
    async fn subscribe(&self, key: &FeedKey, sink: DeliverySink) -> AppResult<LiveSubscription>;
}
