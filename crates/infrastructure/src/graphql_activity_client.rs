use async_trait::async_trait;
use serde_json::Value;
use tasklane_application::{
    ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink, LiveSubscription,
};
use tasklane_core::{AccessToken, AppError, AppResult};
use tasklane_domain::FeedKey;
use tracing::debug;
use url::Url;

use crate::graphql_protocol::{
    decode_page_response, operation_body, page_variables, project_activity_query,
};

/// Paged activity query over GraphQL HTTP.
///
/// This adapter has no live channel of its own; wrap it in
/// [`PollingActivityTransport`](crate::PollingActivityTransport) or
/// [`GraphqlWsActivityTransport`](crate::GraphqlWsActivityTransport).
#[derive(Clone)]
pub struct GraphqlActivityClient {
    http_client: reqwest::Client,
    endpoint: Url,
    token: AccessToken,
}

impl GraphqlActivityClient {
    /// Creates a client for `endpoint`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, endpoint: Url, token: AccessToken) -> Self {
        Self {
            http_client,
            endpoint,
            token,
        }
    }

    /// Returns the GraphQL endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Fetches one page of a feed.
    pub async fn fetch_activity_page(&self, query: &ActivityPageQuery) -> AppResult<ActivityPage> {
        let variables = page_variables(
            &query.key,
            &self.token,
            query.page,
            query.limit,
            query.filters.as_ref(),
        )?;

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .header(reqwest::header::AUTHORIZATION, self.token.bearer_header())
            .json(&operation_body(project_activity_query(), variables))
            .send()
            .await
            .map_err(|error| AppError::Fetch(format!("activity query transport error: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_owned());
            return Err(AppError::Fetch(format!(
                "activity query failed with status {status}: {body}"
            )));
        }

        let body = response.json::<Value>().await.map_err(|error| {
            AppError::Fetch(format!("activity query returned invalid JSON: {error}"))
        })?;
        let page = decode_page_response(body)?;

        debug!(
            organization_id = %query.key.organization_id(),
            project_id = %query.key.project_id(),
            page = query.page,
            fetched = page.logs.len(),
            "fetched activity page"
        );
        Ok(page)
    }
}

#[async_trait]
impl ActivityTransport for GraphqlActivityClient {
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
        self.fetch_activity_page(&query).await
    }

    async fn subscribe(&self, key: &FeedKey, _sink: DeliverySink) -> AppResult<LiveSubscription> {
        Err(AppError::LiveChannel(format!(
            "feed {key} has no live channel over plain HTTP"
        )))
    }
}
