//! Push subscription over the `graphql-transport-ws` protocol.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tasklane_application::{
    ActivityPage, ActivityPageQuery, ActivityTransport, DeliverySink, LiveDelivery,
    LiveSubscription,
};
use tasklane_core::{AppError, AppResult};
use tasklane_domain::FeedKey;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::GraphqlActivityClient;
use crate::graphql_protocol::{
    GraphqlError, join_errors, operation_body, project_activity_subscription, scope_variables,
};

const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live activity transport backed by a GraphQL subscription.
///
/// Pages are fetched through the wrapped HTTP client; every subscription
/// opens its own socket.
pub struct GraphqlWsActivityTransport {
    client: GraphqlActivityClient,
    ws_url: Url,
    handshake_timeout: Duration,
}

impl GraphqlWsActivityTransport {
    /// Creates a transport subscribing at `ws_url`.
    #[must_use]
    pub fn new(client: GraphqlActivityClient, ws_url: Url) -> Self {
        Self {
            client,
            ws_url,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// Overrides how long connect plus `connection_ack` may take.
    #[must_use]
    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    async fn connect(&self) -> AppResult<WsStream> {
        let mut request = self.ws_url.as_str().into_client_request().map_err(|error| {
            AppError::LiveChannel(format!("failed to build websocket request: {error}"))
        })?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(GRAPHQL_TRANSPORT_WS),
        );

        let (stream, _) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    AppError::LiveChannel(format!(
                        "websocket connect timed out after {:?}",
                        self.handshake_timeout
                    ))
                })?
                .map_err(|error| {
                    AppError::LiveChannel(format!("websocket connect failed: {error}"))
                })?;

        Ok(stream)
    }

    async fn initialise(&self, stream: &mut WsStream) -> AppResult<()> {
        let token = self.client.token();
        send_json(
            stream,
            &json!({
                "type": "connection_init",
                "payload": {
                    "authorization": token.bearer_header(),
                    "token": token.expose(),
                },
            }),
        )
        .await?;

        let deadline = tokio::time::Instant::now() + self.handshake_timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| {
                    AppError::LiveChannel("timed out waiting for connection_ack".to_owned())
                })?;

            match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(ServerMessage::ConnectionAck) => return Ok(()),
                        Ok(ServerMessage::Ping) => {
                            send_json(stream, &json!({ "type": "pong" })).await?;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            debug!(error = %error, "ignoring unrecognised handshake frame");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.as_str().to_owned())
                        .unwrap_or_default();
                    return Err(AppError::LiveChannel(format!(
                        "server closed the socket during handshake: {reason}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    return Err(AppError::LiveChannel(format!(
                        "websocket handshake failed: {error}"
                    )));
                }
                None => {
                    return Err(AppError::LiveChannel(
                        "socket ended before connection_ack".to_owned(),
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl ActivityTransport for GraphqlWsActivityTransport {
    async fn fetch_page(&self, query: ActivityPageQuery) -> AppResult<ActivityPage> {
        self.client.fetch_activity_page(&query).await
    }

    async fn subscribe(&self, key: &FeedKey, sink: DeliverySink) -> AppResult<LiveSubscription> {
        let mut stream = self.connect().await?;
        self.initialise(&mut stream).await?;

        let subscription_id = Uuid::new_v4().to_string();
        send_json(
            &mut stream,
            &json!({
                "id": subscription_id,
                "type": "subscribe",
                "payload": operation_body(
                    project_activity_subscription(),
                    Value::Object(scope_variables(key, self.client.token())),
                ),
            }),
        )
        .await?;

        info!(feed = %key, subscription_id = %subscription_id, "graphql subscription started");

        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(relay_subscription(
            stream,
            key.clone(),
            subscription_id,
            sink,
            close_rx,
        ));
        Ok(LiveSubscription::new(close_tx, task))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Ping,
    Pong,
    Next { id: String, payload: Value },
    Error { id: String, payload: Vec<GraphqlError> },
    Complete { id: String },
}

/// What the relay does with one text frame.
#[derive(Debug, PartialEq)]
enum FrameAction {
    Forward(LiveDelivery),
    Pong,
    End(String),
    Fail(String),
    Ignore,
}

fn interpret_frame(text: &str, subscription_id: &str) -> FrameAction {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(error) => {
            warn!(error = %error, "ignoring unrecognised subscription frame");
            return FrameAction::Ignore;
        }
    };

    match message {
        ServerMessage::Ping => FrameAction::Pong,
        ServerMessage::ConnectionAck | ServerMessage::Pong => FrameAction::Ignore,
        ServerMessage::Next { id, .. }
        | ServerMessage::Error { id, .. }
        | ServerMessage::Complete { id }
            if id != subscription_id =>
        {
            FrameAction::Ignore
        }
        ServerMessage::Next { mut payload, .. } => {
            if let Some(errors) = payload.get("errors").cloned() {
                let errors = serde_json::from_value::<Vec<GraphqlError>>(errors).unwrap_or_default();
                if !errors.is_empty() {
                    return FrameAction::Forward(LiveDelivery::Error(join_errors(&errors)));
                }
            }

            match payload
                .get_mut("data")
                .and_then(|data| data.get_mut("projectActivityUpdated"))
                .map(Value::take)
            {
                Some(batch) if !batch.is_null() => FrameAction::Forward(LiveDelivery::Batch(batch)),
                _ => {
                    debug!("subscription frame carried no activity batch");
                    FrameAction::Ignore
                }
            }
        }
        ServerMessage::Error { payload, .. } => FrameAction::Fail(join_errors(&payload)),
        ServerMessage::Complete { .. } => {
            FrameAction::End("subscription completed by server".to_owned())
        }
    }
}

async fn relay_subscription(
    mut stream: WsStream,
    key: FeedKey,
    subscription_id: String,
    sink: DeliverySink,
    mut close_rx: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            biased;

            _ = &mut close_rx => {
                let _ = send_json(
                    &mut stream,
                    &json!({ "id": subscription_id, "type": "complete" }),
                )
                .await;
                let _ = stream.close(None).await;
                debug!(feed = %key, "graphql subscription closed by client");
                return;
            }

            frame = stream.next() => frame,
        };

        let deliveries = match frame {
            Some(Ok(Message::Text(text))) => match interpret_frame(text.as_str(), &subscription_id)
            {
                FrameAction::Forward(delivery) => vec![delivery],
                FrameAction::Pong => {
                    if let Err(error) = send_json(&mut stream, &json!({ "type": "pong" })).await {
                        closing(Some(error.to_string()))
                    } else {
                        continue;
                    }
                }
                FrameAction::End(reason) => closing(Some(reason)),
                FrameAction::Fail(message) => {
                    let mut deliveries = vec![LiveDelivery::Error(message.clone())];
                    deliveries.extend(closing(Some(message)));
                    deliveries
                }
                FrameAction::Ignore => continue,
            },
            Some(Ok(Message::Ping(payload))) => {
                let _ = stream.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(Message::Close(frame))) => closing(
                frame
                    .map(|frame| frame.reason.as_str().to_owned())
                    .filter(|reason| !reason.is_empty())
                    .or_else(|| Some("server closed the socket".to_owned())),
            ),
            Some(Ok(_)) => continue,
            Some(Err(error)) => {
                let message = format!("websocket error: {error}");
                let mut deliveries = vec![LiveDelivery::Error(message.clone())];
                deliveries.extend(closing(Some(message)));
                deliveries
            }
            None => closing(Some("websocket stream ended".to_owned())),
        };

        let finished = deliveries
            .iter()
            .any(|delivery| matches!(delivery, LiveDelivery::Closed(_)));
        for delivery in deliveries {
            if sink.send(delivery).await.is_err() {
                debug!(feed = %key, "subscription consumer went away");
                return;
            }
        }
        if finished {
            return;
        }
    }
}

fn closing(reason: Option<String>) -> Vec<LiveDelivery> {
    vec![LiveDelivery::Closed(reason)]
}

async fn send_json(stream: &mut WsStream, message: &Value) -> AppResult<()> {
    stream
        .send(Message::Text(message.to_string().into()))
        .await
        .map_err(|error| AppError::LiveChannel(format!("websocket send failed: {error}")))
}

/// Derives the subscription endpoint from the HTTP endpoint by swapping
/// `http` for `ws` and `https` for `wss`.
pub fn websocket_url_for(http_url: &Url) -> AppResult<Url> {
    let scheme = match http_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(AppError::Validation(format!(
                "cannot derive a websocket url from scheme '{other}'"
            )));
        }
    };

    let mut ws_url = http_url.clone();
    ws_url.set_scheme(scheme).map_err(|()| {
        AppError::Validation(format!("cannot derive a websocket url from '{http_url}'"))
    })?;
    Ok(ws_url)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tasklane_application::LiveDelivery;
    use url::Url;

    use super::{FrameAction, interpret_frame, websocket_url_for};

    #[test]
    fn next_frame_forwards_activity_batch() {
        let frame = json!({
            "id": "sub-1",
            "type": "next",
            "payload": { "data": { "projectActivityUpdated": { "logs": [] } } }
        })
        .to_string();

        assert_eq!(
            interpret_frame(&frame, "sub-1"),
            FrameAction::Forward(LiveDelivery::Batch(json!({ "logs": [] })))
        );
    }

    #[test]
    fn next_frame_with_errors_is_reported() {
        let frame = json!({
            "id": "sub-1",
            "type": "next",
            "payload": { "errors": [{ "message": "token expired" }] }
        })
        .to_string();

        assert_eq!(
            interpret_frame(&frame, "sub-1"),
            FrameAction::Forward(LiveDelivery::Error("token expired".to_owned()))
        );
    }

    #[test]
    fn frames_for_other_operations_are_ignored() {
        let frame = json!({ "id": "other", "type": "complete" }).to_string();
        assert_eq!(interpret_frame(&frame, "sub-1"), FrameAction::Ignore);
    }

    #[test]
    fn error_and_complete_end_the_subscription() {
        let error = json!({
            "id": "sub-1",
            "type": "error",
            "payload": [{ "message": "forbidden" }]
        })
        .to_string();
        let complete = json!({ "id": "sub-1", "type": "complete" }).to_string();

        assert_eq!(
            interpret_frame(&error, "sub-1"),
            FrameAction::Fail("forbidden".to_owned())
        );
        assert!(matches!(
            interpret_frame(&complete, "sub-1"),
            FrameAction::End(_)
        ));
    }

    #[test]
    fn ping_is_answered_and_garbage_ignored() {
        assert_eq!(interpret_frame(r#"{"type":"ping"}"#, "sub-1"), FrameAction::Pong);
        assert_eq!(interpret_frame("not json", "sub-1"), FrameAction::Ignore);
    }

    #[test]
    fn websocket_url_swaps_scheme() {
        let http = Url::parse("http://localhost:4000/graphql").unwrap_or_else(|_| unreachable!());
        let https = Url::parse("https://api.example.com/graphql").unwrap_or_else(|_| unreachable!());
        let ftp = Url::parse("ftp://example.com/graphql").unwrap_or_else(|_| unreachable!());

        assert_eq!(
            websocket_url_for(&http).map(|url| url.to_string()),
            Ok("ws://localhost:4000/graphql".to_owned())
        );
        assert_eq!(
            websocket_url_for(&https).map(|url| url.to_string()),
            Ok("wss://api.example.com/graphql".to_owned())
        );
        assert!(websocket_url_for(&ftp).is_err());
    }
}
