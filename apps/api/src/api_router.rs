use axum::Router;
use axum::routing::{get, post};
use tasklane_core::AppError;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

mod cors;

const FEED_ROUTE: &str = "/api/organizations/{organization_id}/projects/{project_id}/activity";

pub fn build_router(app_state: AppState, frontend_url: &str) -> Result<Router, AppError> {
    let feed_routes = Router::new()
        .route(
            FEED_ROUTE,
            get(handlers::feeds::feed_view_handler).delete(handlers::feeds::unmount_feed_handler),
        )
        .route(
            &format!("{FEED_ROUTE}/load-more"),
            post(handlers::feeds::load_more_handler),
        )
        .route(
            &format!("{FEED_ROUTE}/refresh"),
            post(handlers::feeds::refresh_handler),
        )
        .route(
            &format!("{FEED_ROUTE}/show-all"),
            post(handlers::feeds::toggle_show_all_handler),
        )
        .route(
            &format!("{FEED_ROUTE}/live-error/dismiss"),
            post(handlers::feeds::dismiss_live_error_handler),
        );

    Ok(Router::new()
        .route("/health", get(handlers::health::health_handler))
        .merge(feed_routes)
        .layer(cors::build_cors_layer(frontend_url)?)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state))
}
