use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tasklane_core::{AppError, AppResult, NonEmptyString, OrganizationId, ProjectId};
use tasklane_domain::{FeedKey, LogAction, LogEntry, Pagination};
use tokio::sync::oneshot;

use crate::feed_ports::{
    ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink, LiveSubscription,
};

type ScriptedPage = (Duration, AppResult<ActivityPage>);

#[derive(Default)]
pub(crate) struct FakeTransport {
    pages: Mutex<HashMap<u32, VecDeque<ScriptedPage>>>,
    sinks: Mutex<Vec<DeliverySink>>,
    queries: Mutex<Vec<ActivityPageQuery>>,
    subscribe_failures: AtomicUsize,
    subscribe_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn push_page(&self, page: u32, result: AppResult<ActivityPage>) {
        self.push_delayed_page(page, Duration::ZERO, result);
    }

    pub(crate) fn push_delayed_page(
        &self,
        page: u32,
        delay: Duration,
        result: AppResult<ActivityPage>,
    ) {
        if let Ok(mut pages) = self.pages.lock() {
            pages.entry(page).or_default().push_back((delay, result));
        }
    }

    pub(crate) fn fail_next_subscribes(&self, count: usize) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn latest_sink(&self) -> Option<DeliverySink> {
        self.sinks.lock().ok().and_then(|sinks| sinks.last().cloned())
    }

    pub(crate) fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn recorded_queries(&self) -> Vec<ActivityPageQuery> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActivityTransport for FakeTransport {
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }
        let scripted = self
            .pages
            .lock()
            .ok()
            .and_then(|mut pages| pages.get_mut(&query.page).and_then(VecDeque::pop_front));

        let Some((delay, result)) = scripted else {
            return Err(AppError::Fetch(format!("no scripted page {}", query.page)));
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn subscribe(&self, _key: &FeedKey, sink: DeliverySink) -> AppResult<LiveSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let remaining_failures = self.subscribe_failures.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.subscribe_failures
                .store(remaining_failures - 1, Ordering::SeqCst);
            return Err(AppError::LiveChannel("subscription refused".to_owned()));
        }

        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(sink);
        }

        let (close_tx, close_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = close_rx.await;
        });
        Ok(LiveSubscription::new(close_tx, task))
    }
}

pub(crate) fn feed_key() -> FeedKey {
    FeedKey::new(
        OrganizationId::new("org-1").unwrap_or_else(|_| unreachable!()),
        ProjectId::new("project-1").unwrap_or_else(|_| unreachable!()),
    )
}

pub(crate) fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

pub(crate) fn log(id: &str, seconds: i64) -> LogEntry {
    LogEntry::new(
        NonEmptyString::new(id).unwrap_or_else(|_| unreachable!()),
        LogAction::TaskUpdated,
        format!("updated {id}"),
        at(seconds),
    )
}

pub(crate) fn page(entries: Vec<LogEntry>, page: u32, limit: u32, total: u64) -> ActivityPage {
    ActivityPage {
        logs: entries,
        pagination: Pagination::for_page(page, limit, total),
    }
}

pub(crate) fn wire_batch(entries: &[LogEntry]) -> Value {
    json!({
        "logs": entries,
        "pagination": Pagination::for_page(1, 20, 0),
    })
}
