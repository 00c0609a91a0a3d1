//! Tasklane activity feed gateway.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod dto;
mod error;
mod handlers;
mod state;

use std::sync::Arc;

use tasklane_application::{ActivityFeedService, ActivityTransport};
use tasklane_core::{AccessToken, AppError};
use tasklane_infrastructure::{
    FallbackActivityTransport, GraphqlActivityClient, GraphqlWsActivityTransport,
    InMemoryActivityTransport, PollingActivityTransport,
};
use tracing::info;

use crate::api_config::{ApiConfig, FeedTransportKind, init_tracing};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;
    let transport = build_transport(&config)?;
    let feed_service = ActivityFeedService::new(transport, config.feed)?;
    let app_state = AppState::new(feed_service, config.http_timeout);
    let mounted_feeds = app_state.mounted_feeds.clone();

    let app = api_router::build_router(app_state, &config.frontend_url)?;
    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind API listener: {error}")))?;

    info!(
        %address,
        transport = config.transport.as_str(),
        graphql_url = %config.graphql_url,
        "activity feed gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("API server failed: {error}")))?;

    mounted_feeds.clear().await;
    info!("activity feed gateway stopped");
    Ok(())
}

fn build_transport(config: &ApiConfig) -> Result<Arc<dyn ActivityTransport>, AppError> {
    if config.transport == FeedTransportKind::InMemory {
        return Ok(Arc::new(InMemoryActivityTransport::new()));
    }

    let token = config
        .backend_token
        .clone()
        .ok_or_else(|| AppError::Validation("BACKEND_TOKEN is required".to_owned()))?;
    let client = graphql_client(config, token)?;
    let polling: Arc<dyn ActivityTransport> = Arc::new(PollingActivityTransport::new(
        Arc::new(client.clone()),
        config.poll_interval,
        config.feed.page_limit,
    ));

    let transport: Arc<dyn ActivityTransport> = match config.transport {
        FeedTransportKind::GraphqlWs => {
            let push = GraphqlWsActivityTransport::new(client, config.graphql_ws_url.clone())
                .with_handshake_timeout(config.http_timeout);
            Arc::new(FallbackActivityTransport::new(
                Arc::new(push),
                polling,
                config.push_failure_threshold,
                config.push_retry_interval,
            ))
        }
        FeedTransportKind::Polling | FeedTransportKind::InMemory => polling,
    };
    Ok(transport)
}

fn graphql_client(config: &ApiConfig, token: AccessToken) -> Result<GraphqlActivityClient, AppError> {
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    Ok(GraphqlActivityClient::new(
        http_client,
        config.graphql_url.clone(),
        token,
    ))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
    }
}
