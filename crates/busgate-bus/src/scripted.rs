//! An in-process, scriptable bus implementation.
//!
//! Useful for tests and development: handlers run on a spawned task and
//! drive a [`ResultSender`] just like a real transport would, so consumer
//! loss, cancellation, and drainage behave exactly as in production.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{BusClient, BusReply};
use crate::error::BusError;
use crate::request::BusRequest;
use crate::response::BusResponse;
use crate::stream::{ResultSender, SectionStream};

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type StreamScript =
    dyn Fn(CancellationToken, BusRequest, ResultSender) -> BoxedFuture + Send + Sync;
type ResponseScript = dyn Fn(BusRequest) -> Result<BusResponse, BusError> + Send + Sync;

enum Script {
    Streaming(Arc<StreamScript>),
    Responding(Arc<ResponseScript>),
}

/// A bus whose behaviour is scripted by a closure.
pub struct ScriptedBus {
    script: Script,
}

impl ScriptedBus {
    /// A bus that answers every request with a streamed reply produced by
    /// `handler` on a spawned task.
    pub fn streaming<F, Fut>(handler: F) -> Self
    where
        F: Fn(CancellationToken, BusRequest, ResultSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            script: Script::Streaming(Arc::new(move |cancel, req, sender| {
                Box::pin(handler(cancel, req, sender))
            })),
        }
    }

    /// A bus that answers every request with a plain response (or error)
    /// computed by `handler`.
    pub fn responding<F>(handler: F) -> Self
    where
        F: Fn(BusRequest) -> Result<BusResponse, BusError> + Send + Sync + 'static,
    {
        Self {
            script: Script::Responding(Arc::new(handler)),
        }
    }
}

impl BusClient for ScriptedBus {
    fn send(
        &self,
        cancel: CancellationToken,
        request: BusRequest,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<BusReply, BusError>> + Send>> {
        match &self.script {
            Script::Streaming(handler) => {
                let handler = Arc::clone(handler);
                Box::pin(async move {
                    let (sender, stream) = SectionStream::channel();
                    tokio::spawn(handler(cancel, request, sender));
                    Ok(BusReply::streamed(stream))
                })
            }
            Script::Responding(handler) => {
                let handler = Arc::clone(handler);
                Box::pin(async move { handler(request).map(BusReply::response) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode};
    use serde_json::json;

    use busgate_core::Wsid;

    use super::*;
    use crate::section::Section;

    #[tokio::test]
    async fn test_should_stream_scripted_sections() {
        let bus = ScriptedBus::streaming(|_cancel, _req, mut sender| async move {
            sender
                .object_section("obj", vec!["meta".to_owned()], json!({"total": 1}))
                .await
                .expect("send section");
            sender.close(None);
        });

        let reply = bus
            .send(
                CancellationToken::new(),
                BusRequest::new(Method::POST, Wsid::new(1)),
                Duration::from_secs(1),
            )
            .await
            .expect("reply");

        let mut stream = reply.stream.expect("streamed reply");
        match stream.next().await.expect("section") {
            Section::Object(s) => assert_eq!(s.kind, "obj"),
            other => panic!("expected object section, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_should_return_scripted_response() {
        let bus = ScriptedBus::responding(|_req| {
            Ok(BusResponse::new(StatusCode::OK, "text/plain", "test resp"))
        });

        let reply = bus
            .send(
                CancellationToken::new(),
                BusRequest::new(Method::POST, Wsid::new(1)),
                Duration::from_secs(1),
            )
            .await
            .expect("reply");

        assert!(reply.stream.is_none());
        assert_eq!(reply.response.status, StatusCode::OK);
        assert_eq!(reply.response.body.as_ref(), b"test resp");
    }

    #[tokio::test]
    async fn test_should_return_scripted_error() {
        let bus = ScriptedBus::responding(|_req| Err(BusError::failed("test error")));

        let err = bus
            .send(
                CancellationToken::new(),
                BusRequest::new(Method::POST, Wsid::new(1)),
                Duration::from_secs(1),
            )
            .await
            .expect_err("scripted error");
        assert_eq!(err.to_string(), "test error");
    }
}
