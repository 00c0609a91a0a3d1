//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod fallback_activity_transport;
mod graphql_activity_client;
mod graphql_protocol;
mod graphql_ws_activity_transport;
mod in_memory_activity_transport;
mod polling_activity_transport;


pub use fallback_activity_transport::FallbackActivityTransport;
pub use graphql_activity_client::GraphqlActivityClient;
pub use graphql_ws_activity_transport::{GraphqlWsActivityTransport, websocket_url_for};
pub use in_memory_activity_transport::InMemoryActivityTransport;
pub use polling_activity_transport::PollingActivityTransport;
