//! GraphQL documents and envelopes shared by the HTTP and WebSocket adapters.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tasklane_application::{ActivityFilters, ActivityPage};
use tasklane_core::{AccessToken, AppError, AppResult};
use tasklane_domain::FeedKey;

const ACTIVITY_SELECTION: &str = r"
      logs {
        id
        action
        message
        createdAt
        performedBy { id name email }
        details {
          taskTitle
          projectName
          oldStatus
          newStatus
          assignedToName
          previousAssigneeName
        }
      }
      pagination { page limit total totalPages hasMore hasPrevious }";

/// Builds the paged activity query document.
pub(crate) fn project_activity_query() -> String {
    format!(
        "query GetProjectActivity($organizationId: ID!, $projectId: ID!, $token: String!, \
         $page: Int, $limit: Int, $filters: ActivityFilters) {{
    projectActivity(organizationId: $organizationId, projectId: $projectId, token: $token, \
         page: $page, limit: $limit, filters: $filters) {{{ACTIVITY_SELECTION}
    }}
}}"
    )
}

/// Builds the live activity subscription document.
pub(crate) fn project_activity_subscription() -> String {
    format!(
        "subscription SubscribeToProjectActivity($organizationId: ID!, $projectId: ID!, \
         $token: String!) {{
    projectActivityUpdated(organizationId: $organizationId, projectId: $projectId, \
         token: $token) {{{ACTIVITY_SELECTION}
    }}
}}"
    )
}

/// Variables shared by both documents.
pub(crate) fn scope_variables(key: &FeedKey, token: &AccessToken) -> Map<String, Value> {
    let mut variables = Map::new();
    variables.insert(
        "organizationId".to_owned(),
        Value::from(key.organization_id().as_str()),
    );
    variables.insert("projectId".to_owned(), Value::from(key.project_id().as_str()));
    variables.insert("token".to_owned(), Value::from(token.expose()));
    variables
}

/// Variables for one page request. Empty filters are not sent.
pub(crate) fn page_variables(
    key: &FeedKey,
    token: &AccessToken,
    page: u32,
    limit: u32,
    filters: Option<&ActivityFilters>,
) -> AppResult<Value> {
    let mut variables = scope_variables(key, token);
    variables.insert("page".to_owned(), Value::from(page));
    variables.insert("limit".to_owned(), Value::from(limit));

    if let Some(filters) = filters.filter(|filters| !filters.is_empty()) {
        let filters = serde_json::to_value(filters).map_err(|error| {
            AppError::Internal(format!("failed to encode activity filters: {error}"))
        })?;
        variables.insert("filters".to_owned(), filters);
    }

    Ok(Value::Object(variables))
}

/// Request body for an operation.
pub(crate) fn operation_body(query: String, variables: Value) -> Value {
    json!({ "query": query, "variables": variables })
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphqlError {
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

/// Joins GraphQL error messages into one line.
pub(crate) fn join_errors(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Extracts `data.projectActivity` from a query response body.
pub(crate) fn decode_page_response(body: Value) -> AppResult<ActivityPage> {
    let response = serde_json::from_value::<GraphqlResponse>(body).map_err(|error| {
        AppError::Fetch(format!("activity query returned an invalid envelope: {error}"))
    })?;

    if !response.errors.is_empty() {
        return Err(AppError::Fetch(format!(
            "activity query failed: {}",
            join_errors(&response.errors)
        )));
    }

    let page = response
        .data
        .and_then(|mut data| data.get_mut("projectActivity").map(Value::take))
        .filter(|page| !page.is_null())
        .ok_or_else(|| {
            AppError::Fetch("activity query returned no projectActivity data".to_owned())
        })?;

    serde_json::from_value::<ActivityPage>(page).map_err(|error| {
        AppError::Fetch(format!("activity query returned an invalid page: {error}"))
    })
}
