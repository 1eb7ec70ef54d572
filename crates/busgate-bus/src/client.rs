//! The client trait the HTTP layer dispatches through.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::request::BusRequest;
use crate::response::BusResponse;
use crate::stream::SectionStream;

/// The reply to a bus invocation.
///
/// Exactly one of `response.body` or `stream` is meaningful: a streamed
/// reply carries its payload in the section stream and the response only
/// contributes the status.
#[derive(Debug)]
pub struct BusReply {
    /// The immediate response.
    pub response: BusResponse,
    /// The section stream for streamed replies.
    pub stream: Option<SectionStream>,
}

impl BusReply {
    /// A plain, non-streamed reply.
    #[must_use]
    pub fn response(response: BusResponse) -> Self {
        Self {
            response,
            stream: None,
        }
    }

    /// A streamed reply with a default 200 response.
    #[must_use]
    pub fn streamed(stream: SectionStream) -> Self {
        Self {
            response: BusResponse::ok(),
            stream: Some(stream),
        }
    }
}

/// Interface to the internal message bus.
///
/// This is the boundary between the HTTP layer and the bus transport.
/// `cancel` is the per-request child token; implementations must observe it,
/// unblock any in-flight wait when it fires, and close the section stream.
/// `timeout` bounds the wait for the first response.
///
/// # Object Safety
///
/// The trait boxes its future so it can be used as `Arc<dyn BusClient>` for
/// dynamic dispatch in the service layer.
pub trait BusClient: Send + Sync + 'static {
    /// Issue a request and return its reply.
    fn send(
        &self,
        cancel: CancellationToken,
        request: BusRequest,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<BusReply, BusError>> + Send>>;
}
