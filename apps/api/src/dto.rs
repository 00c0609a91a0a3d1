use chrono::{DateTime, Utc};
use serde::Serialize;
use tasklane_application::FeedSnapshot;
use tasklane_domain::{LogDetails, LogEntry, Pagination, PerformedBy};
use ts_rs::TS;

/// Health response payload.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/health-response.ts"
)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mounted_feeds: u32,
}

/// User who performed an action.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/performed-by-response.ts"
)]
pub struct PerformedByResponse {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl From<&PerformedBy> for PerformedByResponse {
    fn from(value: &PerformedBy) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
            email: value.email.clone(),
        }
    }
}

/// Action-specific details of an entry.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/log-details-response.ts"
)]
pub struct LogDetailsResponse {
    pub task_title: Option<String>,
    pub project_name: Option<String>,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub assigned_to_name: Option<String>,
    pub previous_assignee_name: Option<String>,
}

impl From<&LogDetails> for LogDetailsResponse {
    fn from(value: &LogDetails) -> Self {
        Self {
            task_title: value.task_title.clone(),
            project_name: value.project_name.clone(),
            old_status: value.old_status.clone(),
            new_status: value.new_status.clone(),
            assigned_to_name: value.assigned_to_name.clone(),
            previous_assignee_name: value.previous_assignee_name.clone(),
        }
    }
}

/// One rendered activity entry.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/log-entry-response.ts"
)]
pub struct LogEntryResponse {
    pub id: String,
    pub action: String,
    pub label: String,
    pub tone: String,
    pub icon: String,
    pub summary: String,
    pub created_at: String,
    pub age_label: String,
    pub performed_by: Option<PerformedByResponse>,
    pub details: Option<LogDetailsResponse>,
}

impl LogEntryResponse {
    pub fn from_entry(entry: &LogEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: entry.id().to_owned(),
            action: entry.action().as_str().to_owned(),
            label: entry.action().label(),
            tone: entry.action().tone().as_str().to_owned(),
            icon: entry.action().icon().to_owned(),
            summary: entry.summary(),
            created_at: entry.created_at().to_rfc3339(),
            age_label: entry.age_label(now),
            performed_by: entry.performed_by().map(PerformedByResponse::from),
            details: entry.details().map(LogDetailsResponse::from),
        }
    }
}

/// Pagination cursor of the loaded slice.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/pagination-response.ts"
)]
pub struct PaginationResponse {
    pub page: u32,
    pub limit: u32,
    #[ts(type = "number")]
    pub total: u64,
    pub total_pages: u32,
    pub has_more: bool,
    pub has_previous: bool,
}

impl From<&Pagination> for PaginationResponse {
    fn from(value: &Pagination) -> Self {
        Self {
            page: value.page,
            limit: value.limit,
            total: value.total,
            total_pages: value.total_pages,
            has_more: value.has_more,
            has_previous: value.has_previous,
        }
    }
}

/// Projected activity feed as rendered by the UI.
#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/feed-view-response.ts"
)]
pub struct FeedViewResponse {
    pub entries: Vec<LogEntryResponse>,
    pub loaded: u32,
    pub pagination: Option<PaginationResponse>,
    pub show_all: bool,
    pub can_load_more: bool,
    pub can_toggle_show_all: bool,
    pub toggle_label: String,
    pub showing_summary: Option<String>,
    pub loading: bool,
    pub fetch_error: Option<String>,
    pub live_error: Option<String>,
}

impl FeedViewResponse {
    pub fn from_snapshot(snapshot: &FeedSnapshot, now: DateTime<Utc>) -> Self {
        let view = snapshot.view();

        Self {
            entries: view
                .visible()
                .iter()
                .map(|entry| LogEntryResponse::from_entry(entry, now))
                .collect(),
            loaded: u32::try_from(view.loaded()).unwrap_or(u32::MAX),
            pagination: view.pagination().map(PaginationResponse::from),
            show_all: view.show_all(),
            can_load_more: view.can_load_more(),
            can_toggle_show_all: view.can_toggle_show_all(),
            toggle_label: view.toggle_label(),
            showing_summary: view.showing_summary(),
            loading: snapshot.loading,
            fetch_error: snapshot.fetch_error.clone(),
            live_error: snapshot.live_error.clone(),
        }
    }
}
