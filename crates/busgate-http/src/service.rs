//! The hyper service wiring routes to handlers.
//!
//! One [`RouterService`] instance serves every connection. Per request it:
//!
//! 1. derives a child token from the application shutdown token (the
//!    per-request cancellation root);
//! 2. short-circuits CORS preflight on `/api` and `/blob`;
//! 3. resolves the route and runs the matching handler;
//! 4. falls through to the reverse proxy, then 404;
//! 5. stamps CORS headers (on `/api`/`/blob`) and the request id.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use busgate_bus::{BusClient, BusRequest};
use busgate_core::{bearer_token, RouterConfig, Wsid};
use busgate_n10n::NotificationBroker;

use crate::blob::{BlobFrontend, BlobJob};
use crate::body::RouterBody;
use crate::dispatch::Dispatcher;
use crate::n10n::N10nHandler;
use crate::proxy::{ProxyClient, ProxyMatcher};
use crate::response::{
    add_cors_headers, add_request_id, not_found, preflight_response, text_response,
    CONTENT_TYPE_TEXT,
};
use crate::router::{parse_query_params, DispatchTarget, RoutedRequest, Router};

use busgate_blob::ProcBusSender;

/// External collaborators the service is wired to.
pub struct ServiceDeps {
    /// The message bus.
    pub bus: Arc<dyn BusClient>,
    /// The notification broker.
    pub broker: Arc<dyn NotificationBroker>,
    /// Submission handle for the blob worker pool.
    pub blob_jobs: ProcBusSender<BlobJob>,
    /// The application lifecycle token; parents every request token.
    pub shutdown: CancellationToken,
}

struct ServiceState {
    router: Router,
    dispatcher: Dispatcher,
    blob: BlobFrontend,
    n10n: N10nHandler,
    proxy: ProxyClient,
    queues_partitions: std::collections::HashMap<String, u32>,
    /// Pre-rendered `GET /api` body; the queue set is fixed at prepare time.
    queue_names_json: Bytes,
    shutdown: CancellationToken,
}

/// The busgate HTTP service.
#[derive(Clone)]
pub struct RouterService {
    state: Arc<ServiceState>,
}

impl RouterService {
    /// Build the service from configuration and collaborators.
    ///
    /// # Errors
    ///
    /// Fails when the reverse-proxy configuration is invalid.
    pub fn new(config: &RouterConfig, deps: ServiceDeps) -> Result<Self, busgate_core::BusgateError> {
        let mut queue_names: Vec<&str> = config
            .queues_partitions
            .keys()
            .map(String::as_str)
            .collect();
        queue_names.sort_unstable();
        let queue_names_json = Bytes::from(
            serde_json::to_vec(&queue_names).expect("string slice serialization is infallible"),
        );

        let matcher = ProxyMatcher::from_config(
            &config.routes,
            &config.routes_rewrite,
            config.route_default.as_deref(),
        )?;

        Ok(Self {
            state: Arc::new(ServiceState {
                router: Router::new(config.use_app_qualified_routing),
                dispatcher: Dispatcher::new(Arc::clone(&deps.bus), config.bus_timeout()),
                blob: BlobFrontend::new(deps.blob_jobs, config.blob.retry_after_secs),
                n10n: N10nHandler::new(deps.broker),
                proxy: ProxyClient::new(matcher),
                queues_partitions: config.queues_partitions.clone(),
                queue_names_json,
                shutdown: deps.shutdown,
            }),
        })
    }

    async fn handle(state: Arc<ServiceState>, req: Request<Incoming>) -> Response<RouterBody> {
        let request_id = Uuid::new_v4().to_string();
        let cancel = state.shutdown.child_token();

        let path = req.uri().path();
        let cors_scope = path.starts_with("/api") || path.starts_with("/blob");

        if cors_scope && req.method() == Method::OPTIONS {
            return preflight_response();
        }

        let route = state.router.resolve(req.method(), req.uri());
        debug!(method = %req.method(), path = %path, route = ?route, request_id, "routing request");

        let mut response = match route {
            RoutedRequest::ApiCheck => text_response(StatusCode::OK, "ok"),
            RoutedRequest::QueueNames => Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_TYPE, CONTENT_TYPE_TEXT)
                .body(RouterBody::from_bytes(state.queue_names_json.clone()))
                .expect("static response parts are valid"),
            RoutedRequest::Dispatch {
                target,
                wsid,
                resource,
            } => Self::handle_dispatch(&state, req, &cancel, target, wsid, resource).await,
            RoutedRequest::BlobUpload { app, wsid } => {
                state.blob.handle_upload(req, app, wsid, cancel.clone()).await
            }
            RoutedRequest::BlobDownload { app, wsid, blob_id } => {
                state
                    .blob
                    .handle_download(req, app, wsid, blob_id, cancel.clone())
                    .await
            }
            RoutedRequest::N10nChannel => state.n10n.handle_channel(req.uri(), cancel.clone()),
            RoutedRequest::N10nSubscribe => state.n10n.handle_subscribe(req.uri()),
            RoutedRequest::N10nUnsubscribe => state.n10n.handle_unsubscribe(req.uri()),
            RoutedRequest::N10nUpdate { offset } => {
                match req.into_body().collect().await {
                    Ok(body) => state.n10n.handle_update(offset, &body.to_bytes()),
                    Err(e) => text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("error when read request body: {e}"),
                    ),
                }
            }
            RoutedRequest::NoMatch => match state.proxy.forward(req).await {
                Some(response) => response,
                None => not_found(),
            },
        };

        if cors_scope {
            add_cors_headers(&mut response);
        }
        add_request_id(&mut response, &request_id);
        response
    }

    /// Build the bus request and run the dispatch pipeline.
    async fn handle_dispatch(
        state: &ServiceState,
        req: Request<Incoming>,
        cancel: &CancellationToken,
        target: DispatchTarget,
        wsid: Wsid,
        resource: String,
    ) -> Response<RouterBody> {
        let (parts, body) = req.into_parts();

        let mut bus_request = BusRequest::new(parts.method, wsid);
        bus_request = match target {
            DispatchTarget::Queue(alias) => {
                let Some(&partitions) = state.queues_partitions.get(&alias) else {
                    return text_response(
                        StatusCode::BAD_REQUEST,
                        format!("can't find queue for alias: {alias}"),
                    );
                };
                bus_request.with_queue(alias, partitions)
            }
            DispatchTarget::App(app) => bus_request.with_app(app),
        };
        bus_request.resource = resource;
        bus_request.query = parse_query_params(parts.uri.query().unwrap_or(""));
        bus_request.principal_token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(ToOwned::to_owned);
        bus_request.headers = parts.headers;

        bus_request.body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("can't read request body: {e}"),
                )
            }
        };

        state.dispatcher.dispatch(cancel, bus_request).await
    }
}

impl Service<Request<Incoming>> for RouterService {
    type Response = Response<RouterBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(Self::handle(state, req).await) })
    }
}

/// Duration the server container waits between polls while draining
/// notification subscriptions at shutdown.
pub const SUBSCRIPTIONS_CLOSE_CHECK_INTERVAL: Duration = Duration::from_millis(100);
