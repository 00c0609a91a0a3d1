use axum::Json;
use axum::extract::State;

use crate::dto::HealthResponse;
use crate::state::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mounted_feeds = state.mounted_feeds.count().await;

    Json(HealthResponse {
        status: "ok",
        mounted_feeds: u32::try_from(mounted_feeds).unwrap_or(u32::MAX),
    })
}
