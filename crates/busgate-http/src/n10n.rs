//! Notification endpoints: Server-Sent Events over the streaming body.
//!
//! `GET /n10n/channel` creates a broker channel, subscribes it to the
//! requested projections, and then streams updates as SSE frames:
//! `event: channelId` first, then one `event:`/`data:` pair per update.
//! `subscribe`/`unsubscribe` manage an existing channel, and
//! `POST /n10n/update/{offset}` records an offset by hand (a development
//! aid driving the tests).
//!
//! All parameters arrive URL-encoded in a JSON `payload` query parameter.

use std::sync::Arc;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http::{Response, StatusCode, Uri};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use busgate_n10n::{ChannelId, N10nError, NotificationBroker, Offset, ProjectionKey};

use crate::body::{BodySender, RouterBody};
use crate::response::text_response;
use crate::router::parse_query_params;

/// Channel lifetime handed to the broker.
const CHANNEL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// `payload` of `GET /n10n/channel`.
#[derive(Debug, serde::Deserialize)]
struct CreateChannelParams {
    #[serde(rename = "SubjectLogin")]
    subject_login: String,
    #[serde(rename = "ProjectionKey")]
    projection_key: Vec<ProjectionKey>,
}

/// `payload` of `GET /n10n/subscribe` and `GET /n10n/unsubscribe`.
#[derive(Debug, serde::Deserialize)]
struct SubscriberParams {
    #[serde(rename = "Channel")]
    channel: ChannelId,
    #[serde(rename = "ProjectionKey")]
    projection_key: Vec<ProjectionKey>,
}

/// The notification endpoint handlers.
pub struct N10nHandler {
    broker: Arc<dyn NotificationBroker>,
}

impl N10nHandler {
    /// Create the handlers over a broker.
    #[must_use]
    pub fn new(broker: Arc<dyn NotificationBroker>) -> Self {
        Self { broker }
    }

    /// `GET /n10n/channel` — subscribe-and-watch.
    pub fn handle_channel(&self, uri: &Uri, cancel: CancellationToken) -> Response<RouterBody> {
        let params: CreateChannelParams = match payload_param(uri) {
            Ok(params) => params,
            Err(resp) => return resp,
        };
        info!(subject = %params.subject_login, projections = params.projection_key.len(),
            "n10n subscribe and watch");

        let channel = match self
            .broker
            .new_channel(params.subject_login, CHANNEL_TTL)
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "channel creation refused");
                return text_response(StatusCode::TOO_MANY_REQUESTS, "error create new channel");
            }
        };

        for projection in params.projection_key {
            if let Err(e) = self.broker.subscribe(&channel, projection) {
                warn!(error = %e, "subscription failed");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        }

        let (body_sender, body) = RouterBody::channel();
        self.spawn_watch(channel, body_sender, cancel);

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(body)
            .expect("static response parts are valid")
    }

    /// Producer plus consumer: the producer forwards broker updates onto an
    /// in-process channel and closes it when the watch ends; the consumer
    /// renders SSE frames until the request ends or the producer closes.
    fn spawn_watch(&self, channel: ChannelId, body: BodySender, cancel: CancellationToken) {
        let broker = Arc::clone(&self.broker);
        let watch_cancel = cancel.child_token();

        let (tx, mut rx) = mpsc::unbounded_channel::<(ProjectionKey, Offset)>();
        let producer_cancel = watch_cancel.clone();
        let producer_channel = channel.clone();
        tokio::spawn(async move {
            broker
                .watch(
                    producer_cancel,
                    producer_channel,
                    Box::new(move |projection, offset| {
                        let _ = tx.send((projection, offset));
                    }),
                )
                .await;
        });

        tokio::spawn(async move {
            let greeting = format!("event: channelId\ndata: {channel}\n\n");
            if body.send(greeting).await.is_err() {
                watch_cancel.cancel();
                return;
            }

            loop {
                let update = tokio::select! {
                    () = cancel.cancelled() => break,
                    update = rx.recv() => update,
                };
                let Some((projection, offset)) = update else {
                    debug!("watch done");
                    break;
                };
                let Ok(projection) = serde_json::to_string(&projection) else {
                    continue;
                };
                let frame = format!("event: {projection}\ndata: {offset}\n\n");
                if body.send(frame).await.is_err() {
                    break;
                }
            }
            watch_cancel.cancel();
        });
    }

    /// `GET /n10n/subscribe`.
    pub fn handle_subscribe(&self, uri: &Uri) -> Response<RouterBody> {
        let params: SubscriberParams = match payload_param(uri) {
            Ok(params) => params,
            Err(resp) => return resp,
        };
        info!(channel = %params.channel, "n10n subscribe");
        for projection in params.projection_key {
            if let Err(e) = self.broker.subscribe(&params.channel, projection) {
                return subscription_error(&e);
            }
        }
        ok_empty()
    }

    /// `GET /n10n/unsubscribe`.
    pub fn handle_unsubscribe(&self, uri: &Uri) -> Response<RouterBody> {
        let params: SubscriberParams = match payload_param(uri) {
            Ok(params) => params,
            Err(resp) => return resp,
        };
        info!(channel = %params.channel, "n10n unsubscribe");
        for projection in &params.projection_key {
            if let Err(e) = self.broker.unsubscribe(&params.channel, projection) {
                return subscription_error(&e);
            }
        }
        ok_empty()
    }

    /// `POST /n10n/update/{offset}` — record an offset by hand.
    pub fn handle_update(&self, offset: Offset, body: &[u8]) -> Response<RouterBody> {
        let projection: ProjectionKey = match serde_json::from_slice(body) {
            Ok(projection) => projection,
            Err(e) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("error when parse request body: {e}"),
                )
            }
        };
        self.broker.update(projection, offset);
        ok_empty()
    }
}

fn ok_empty() -> Response<RouterBody> {
    Response::builder()
        .status(StatusCode::OK)
        .body(RouterBody::empty())
        .expect("static response parts are valid")
}

fn subscription_error(err: &N10nError) -> Response<RouterBody> {
    warn!(error = %err, "n10n subscription operation failed");
    text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Extract and parse the URL-encoded JSON `payload` query parameter.
fn payload_param<T: serde::de::DeserializeOwned>(uri: &Uri) -> Result<T, Response<RouterBody>> {
    let params = parse_query_params(uri.query().unwrap_or(""));
    let payload = params
        .iter()
        .find(|(k, _)| k == "payload")
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    if payload.is_empty() {
        return Err(text_response(
            StatusCode::BAD_REQUEST,
            "query parameter with payload is missing",
        ));
    }
    serde_json::from_str(payload).map_err(|e| {
        text_response(
            StatusCode::BAD_REQUEST,
            format!("cannot unmarshal input payload: {e}"),
        )
    })
}
