use serde::{Deserialize, Serialize};
use tasklane_domain::{FeedKey, LogEntry, Pagination};

/// Optional backend-side filters, forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFilters {
    /// Restrict to one action tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Restrict to one acting user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<String>,
}

impl ActivityFilters {
    /// Returns whether no filter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.action.is_none() && self.performed_by.is_none()
    }
}

/// Paged query for one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityPageQuery {
    /// Feed scope.
    pub key: FeedKey,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Optional filters; `None` or empty filters are not sent.
    pub filters: Option<ActivityFilters>,
}

impl ActivityPageQuery {
    /// Creates an unfiltered query for `page`.
    #[must_use]
    pub fn new(key: FeedKey, page: u32, limit: u32) -> Self {
        Self {
            key,
            page: page.max(1),
            limit,
            filters: None,
        }
    }

    /// Adds filters.
    #[must_use]
    pub fn with_filters(mut self, filters: ActivityFilters) -> Self {
        self.filters = (!filters.is_empty()).then_some(filters);
        self
    }
}

/// One page of activity as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPage {
    /// Entries on this page, newest first.
    pub logs: Vec<LogEntry>,
    /// Cursor for this page.
    pub pagination: Pagination,
}
