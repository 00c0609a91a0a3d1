use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tasklane_core::{OrganizationId, ProjectId};

use crate::reconcile::{dedup_by_id, sort_newest_first};
use crate::{LogEntry, Pagination};

/// Scope of one activity log instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedKey {
    organization_id: OrganizationId,
    project_id: ProjectId,
}

impl FeedKey {
    /// Creates a feed key.
    #[must_use]
    pub fn new(organization_id: OrganizationId, project_id: ProjectId) -> Self {
        Self {
            organization_id,
            project_id,
        }
    }

    /// Returns the organization scope.
    #[must_use]
    pub fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }

    /// Returns the project scope.
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}

impl Display for FeedKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}/{}", self.organization_id, self.project_id)
    }
}

/// Cached view of one feed: entries newest first with unique ids, plus the
/// cursor of the last loaded page.
///
/// Snapshots are immutable. Every change produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedState {
    entries: Vec<LogEntry>,
    pagination: Pagination,
}

impl FeedState {
    /// Builds state from a first-page response, dropping repeated ids and
    /// ordering newest first.
    #[must_use]
    pub fn from_first_page(entries: Vec<LogEntry>, pagination: Pagination) -> Self {
        let mut entries = dedup_by_id(entries);
        sort_newest_first(&mut entries);
        Self {
            entries,
            pagination,
        }
    }

    pub(crate) fn from_parts(entries: Vec<LogEntry>, pagination: Pagination) -> Self {
        Self {
            entries,
            pagination,
        }
    }

    /// Returns entries in display order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        self.entries.as_slice()
    }

    /// Returns the cursor of the last loaded page.
    #[must_use]
    pub fn pagination(&self) -> &Pagination {
        &self.pagination
    }

    /// Returns the loaded entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether an entry with `id` is loaded.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id() == id)
    }

    /// Returns the set of loaded ids.
    #[must_use]
    pub fn entry_ids(&self) -> HashSet<&str> {
        self.entries.iter().map(LogEntry::id).collect()
    }
}
