//! Request dispatch: bus invocation and the reply contract.
//!
//! Four outcomes of a bus call:
//!
//! 1. the call fails: plain-text 500 carrying the error;
//! 2. a plain reply: status, content type, and body echoed verbatim;
//! 3. a streamed reply drained normally: sectioned JSON, closed cleanly;
//! 4. a streamed reply ending in an error: sectioned JSON with the embedded
//!    `"status":500,"errorDescription"` trailer, still HTTP 200 — once the
//!    first section byte is out the status is committed.
//!
//! A panic inside the bus client is caught and reported as a plain-text 500
//! with the panic message.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use busgate_bus::{BusClient, BusRequest};

use crate::body::RouterBody;
use crate::response::{text_response, CONTENT_TYPE_JSON};
use crate::sections::write_sectioned_response;

/// Dispatches requests to the bus and frames the replies.
pub struct Dispatcher {
    bus: Arc<dyn BusClient>,
    bus_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over the given bus client.
    #[must_use]
    pub fn new(bus: Arc<dyn BusClient>, bus_timeout: Duration) -> Self {
        Self { bus, bus_timeout }
    }

    /// Invoke the bus and relay the reply.
    ///
    /// `cancel` is the per-request token; a child of it is handed to the bus
    /// and to the section writer, so client disconnects, write failures, and
    /// application shutdown all converge on the same signal upstream.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        request: BusRequest,
    ) -> Response<RouterBody> {
        let child = cancel.child_token();
        debug!(
            wsid = %request.wsid,
            resource = %request.resource,
            partition = ?request.partition,
            "dispatching bus request"
        );

        let sent = std::panic::AssertUnwindSafe(self.bus.send(
            child.clone(),
            request,
            self.bus_timeout,
        ))
        .catch_unwind()
        .await;

        let reply = match sent {
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(panic = %msg, "bus invocation panicked");
                child.cancel();
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, msg);
            }
            Ok(Err(err)) => {
                child.cancel();
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
            }
            Ok(Ok(reply)) => reply,
        };

        let Some(stream) = reply.stream else {
            child.cancel();
            let mut builder = Response::builder().status(reply.response.status);
            if !reply.response.content_type.is_empty() {
                builder = builder.header(CONTENT_TYPE, reply.response.content_type.as_str());
            }
            return builder
                .body(RouterBody::from_bytes(reply.response.body))
                .unwrap_or_else(|_| {
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid bus response")
                });
        };

        // Streamed reply: commit 200 and the JSON headers before the first
        // byte; everything after this point is append-only body.
        let (body_sender, body) = RouterBody::channel();
        let step_timeout = self.bus_timeout;
        tokio::spawn(write_sectioned_response(
            body_sender,
            child,
            stream,
            step_timeout,
        ));

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header("X-Content-Type-Options", "nosniff")
            .body(body)
            .expect("static response parts are valid")
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic during dispatch".to_owned()
    }
}
