use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use tasklane_application::{ActivityFilters, FeedHandle, FeedSnapshot, LoadOutcome};
use tasklane_core::{AppError, OrganizationId, ProjectId};
use tasklane_domain::FeedKey;
use tracing::debug;

use crate::dto::FeedViewResponse;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedPath {
    pub organization_id: String,
    pub project_id: String,
}

impl FeedPath {
    fn feed_key(self) -> Result<FeedKey, AppError> {
        let organization_id = OrganizationId::new(self.organization_id).map_err(|_| {
            AppError::Validation("organization id must not be empty".to_owned())
        })?;
        let project_id = ProjectId::new(self.project_id)
            .map_err(|_| AppError::Validation("project id must not be empty".to_owned()))?;

        Ok(FeedKey::new(organization_id, project_id))
    }
}

/// Backend filters applied when a request mounts the feed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedFilterQuery {
    pub action: Option<String>,
    pub performed_by: Option<String>,
}

impl From<FeedFilterQuery> for ActivityFilters {
    fn from(value: FeedFilterQuery) -> Self {
        let non_blank = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
        Self {
            action: non_blank(value.action),
            performed_by: non_blank(value.performed_by),
        }
    }
}

fn render(snapshot: &FeedSnapshot) -> Json<FeedViewResponse> {
    Json(FeedViewResponse::from_snapshot(snapshot, Utc::now()))
}

async fn wait_for_first_load(handle: &FeedHandle, timeout: Duration) {
    let mut changes = handle.changes();
    let settled = tokio::time::timeout(timeout, async {
        changes
            .wait_for(|snapshot| snapshot.state.is_some() || snapshot.fetch_error.is_some())
            .await
            .is_ok()
    })
    .await;

    if !matches!(settled, Ok(true)) {
        debug!(feed = %handle.key(), "first activity load still pending");
    }
}

pub async fn feed_view_handler(
    State(state): State<AppState>,
    Path(path): Path<FeedPath>,
    Query(filters): Query<FeedFilterQuery>,
) -> ApiResult<Json<FeedViewResponse>> {
    let key = path.feed_key()?;
    let (handle, mounted) = state
        .mounted_feeds
        .get_or_mount(&state.feed_service, key, filters.into())
        .await?;

    if mounted {
        wait_for_first_load(&handle, state.first_load_timeout).await;
    }
    if handle.is_unmounted() {
        return Err(AppError::NotFound(format!("feed {} is not mounted", handle.key())).into());
    }

    Ok(render(&handle.snapshot()))
}

pub async fn load_more_handler(
    State(state): State<AppState>,
    Path(path): Path<FeedPath>,
) -> ApiResult<Json<FeedViewResponse>> {
    let handle = state.mounted_feeds.get(&path.feed_key()?).await?;
    let outcome = handle.load_more().await?;
    debug!(feed = %handle.key(), outcome = outcome_name(&outcome), "load more finished");

    Ok(render(&handle.snapshot()))
}

pub async fn refresh_handler(
    State(state): State<AppState>,
    Path(path): Path<FeedPath>,
) -> ApiResult<Json<FeedViewResponse>> {
    let handle = state.mounted_feeds.get(&path.feed_key()?).await?;
    handle.refresh().await?;

    Ok(render(&handle.snapshot()))
}

pub async fn toggle_show_all_handler(
    State(state): State<AppState>,
    Path(path): Path<FeedPath>,
) -> ApiResult<Json<FeedViewResponse>> {
    let handle = state.mounted_feeds.get(&path.feed_key()?).await?;
    handle.toggle_show_all()?;

    Ok(render(&handle.snapshot()))
}

pub async fn dismiss_live_error_handler(
    State(state): State<AppState>,
    Path(path): Path<FeedPath>,
) -> ApiResult<Json<FeedViewResponse>> {
    let handle = state.mounted_feeds.get(&path.feed_key()?).await?;
    handle.dismiss_live_error()?;

    Ok(render(&handle.snapshot()))
}

pub async fn unmount_feed_handler(
    State(state): State<AppState>,
    Path(path): Path<FeedPath>,
) -> ApiResult<StatusCode> {
    let key = path.feed_key()?;
    if state.mounted_feeds.unmount(&key).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("feed {key} is not mounted")).into())
    }
}

fn outcome_name(outcome: &LoadOutcome) -> &'static str {
    match outcome {
        LoadOutcome::Applied(_) => "applied",
        LoadOutcome::Superseded => "superseded",
        LoadOutcome::NoMorePages => "no_more_pages",
    }
}
