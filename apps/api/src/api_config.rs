use std::env;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tasklane_application::FeedConfig;
use tasklane_core::{AccessToken, AppError};
use tasklane_infrastructure::websocket_url_for;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Backend used to fetch and follow activity feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedTransportKind {
    GraphqlWs,
    Polling,
    InMemory,
}

impl FeedTransportKind {
    fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim() {
            "graphql-ws" => Ok(Self::GraphqlWs),
            "polling" => Ok(Self::Polling),
            "in-memory" => Ok(Self::InMemory),
            other => Err(AppError::Validation(format!(
                "FEED_TRANSPORT must be one of 'graphql-ws', 'polling' or 'in-memory', got '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GraphqlWs => "graphql-ws",
            Self::Polling => "polling",
            Self::InMemory => "in-memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_host: String,
    pub api_port: u16,
    pub frontend_url: String,
    pub transport: FeedTransportKind,
    pub graphql_url: Url,
    pub graphql_ws_url: Url,
    pub backend_token: Option<AccessToken>,
    pub poll_interval: Duration,
    pub push_failure_threshold: u32,
    pub push_retry_interval: Duration,
    pub http_timeout: Duration,
    pub feed: FeedConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(|name| env::var(name).ok())
    }

    pub fn load_from<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_host = lookup("API_HOST").unwrap_or_else(|| "127.0.0.1".to_owned());
        let api_port = parse_env(&lookup, "API_PORT", 3002_u16)?;
        let frontend_url =
            lookup("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".to_owned());

        let transport = lookup("FEED_TRANSPORT")
            .filter(|value| !value.trim().is_empty())
            .map(|value| FeedTransportKind::parse(&value))
            .transpose()?
            .unwrap_or(FeedTransportKind::GraphqlWs);

        let graphql_url = parse_url(
            "GRAPHQL_URL",
            &lookup("GRAPHQL_URL").unwrap_or_else(|| "http://localhost:4000/graphql".to_owned()),
        )?;
        let graphql_ws_url = match lookup("GRAPHQL_WS_URL").filter(|value| !value.trim().is_empty())
        {
            Some(value) => parse_url("GRAPHQL_WS_URL", &value)?,
            None => websocket_url_for(&graphql_url)?,
        };

        let backend_token = match transport {
            FeedTransportKind::InMemory => None,
            FeedTransportKind::GraphqlWs | FeedTransportKind::Polling => {
                let token = lookup("BACKEND_TOKEN").ok_or_else(|| {
                    AppError::Validation(format!(
                        "BACKEND_TOKEN is required for FEED_TRANSPORT={}",
                        transport.as_str()
                    ))
                })?;
                Some(AccessToken::new(token).map_err(|_| {
                    AppError::Validation("BACKEND_TOKEN must not be empty".to_owned())
                })?)
            }
        };

        let defaults = FeedConfig::default();
        let feed = FeedConfig {
            page_limit: parse_env(&lookup, "FEED_PAGE_LIMIT", defaults.page_limit)?,
            resubscribe_max_backoff_ms: parse_env(
                &lookup,
                "FEED_RESUBSCRIBE_MAX_BACKOFF_MS",
                defaults.resubscribe_max_backoff_ms,
            )?,
            ..defaults
        };
        feed.validate()?;

        let poll_interval_ms = parse_env(&lookup, "FEED_POLL_INTERVAL_MS", 5_000_u64)?;
        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "FEED_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }
        let push_failure_threshold = parse_env(&lookup, "FEED_PUSH_FAILURE_THRESHOLD", 3_u32)?;
        if push_failure_threshold == 0 {
            return Err(AppError::Validation(
                "FEED_PUSH_FAILURE_THRESHOLD must be greater than zero".to_owned(),
            ));
        }
        let push_retry_interval_ms =
            parse_env(&lookup, "FEED_PUSH_RETRY_INTERVAL_MS", 30_000_u64)?;
        let http_timeout_seconds = parse_env(&lookup, "HTTP_TIMEOUT_SECONDS", 15_u64)?;

        Ok(Self {
            api_host,
            api_port,
            frontend_url,
            transport,
            graphql_url,
            graphql_ws_url,
            backend_token,
            poll_interval: Duration::from_millis(poll_interval_ms),
            push_failure_threshold,
            push_retry_interval: Duration::from_millis(push_retry_interval_ms),
            http_timeout: Duration::from_secs(http_timeout_seconds.max(1)),
            feed,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_env<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|error| AppError::Validation(format!("invalid {name}: {error}"))),
        None => Ok(default),
    }
}

fn parse_url(name: &str, value: &str) -> Result<Url, AppError> {
    Url::parse(value.trim()).map_err(|error| AppError::Validation(format!("invalid {name}: {error}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tasklane_core::AppError;

    use super::{ApiConfig, FeedTransportKind};

    fn load(vars: &[(&str, &str)]) -> Result<ApiConfig, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        ApiConfig::load_from(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_for_graphql_transport() {
        let config = load(&[("BACKEND_TOKEN", "secret")]).unwrap_or_else(|_| unreachable!());

        assert_eq!(config.transport, FeedTransportKind::GraphqlWs);
        assert_eq!(config.api_port, 3002);
        assert_eq!(config.graphql_url.as_str(), "http://localhost:4000/graphql");
        assert_eq!(config.graphql_ws_url.as_str(), "ws://localhost:4000/graphql");
        assert_eq!(config.feed.page_limit, 20);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.push_failure_threshold, 3);
        assert_eq!(config.push_retry_interval, Duration::from_secs(30));
        assert_eq!(config.http_timeout, Duration::from_secs(15));
        assert!(config.backend_token.is_some());
    }

    #[test]
    fn backend_token_is_required_unless_in_memory() {
        assert!(matches!(load(&[]), Err(AppError::Validation(_))));

        let config = load(&[("FEED_TRANSPORT", "in-memory")]).unwrap_or_else(|_| unreachable!());
        assert_eq!(config.transport, FeedTransportKind::InMemory);
        assert!(config.backend_token.is_none());
    }

    #[test]
    fn explicit_websocket_url_wins() {
        let config = load(&[
            ("BACKEND_TOKEN", "secret"),
            ("GRAPHQL_URL", "https://api.example.com/graphql"),
            ("GRAPHQL_WS_URL", "wss://live.example.com/graphql"),
        ])
        .unwrap_or_else(|_| unreachable!());

        assert_eq!(config.graphql_ws_url.as_str(), "wss://live.example.com/graphql");
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let result = load(&[("FEED_TRANSPORT", "in-memory"), ("FEED_PAGE_LIMIT", "many")]);
        assert!(
            matches!(result, Err(AppError::Validation(message)) if message.starts_with("invalid FEED_PAGE_LIMIT"))
        );

        assert!(load(&[("FEED_TRANSPORT", "carrier-pigeon")]).is_err());
        assert!(load(&[("FEED_TRANSPORT", "in-memory"), ("FEED_PAGE_LIMIT", "0")]).is_err());
        assert!(
            load(&[
                ("FEED_TRANSPORT", "in-memory"),
                ("FEED_PUSH_FAILURE_THRESHOLD", "0")
            ])
            .is_err()
        );
    }
}
