//! Router response body supporting buffered, empty, and streaming modes.
//!
//! This module provides [`RouterBody`], the HTTP response body type used
//! throughout the router. It supports four modes:
//!
//! - **Buffered**: small responses such as error texts and fixed bodies.
//! - **Empty**: responses with no body content.
//! - **Channel**: incrementally produced responses (sectioned JSON, SSE).
//!   Every chunk pushed into the channel becomes its own body frame, so long
//!   replies stream instead of buffering; a failed push is how the producer
//!   learns the client is gone.
//! - **Stream**: pass-through of an upstream byte stream (blob downloads,
//!   reverse-proxied responses).

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream};
use http_body::Frame;
use http_body_util::Full;
use tokio::sync::mpsc;

/// Capacity of the channel body. One frame in flight preserves backpressure
/// from the socket to the producer.
const CHANNEL_BODY_CAPACITY: usize = 1;

/// The consumer of a [`RouterBody::Channel`] is gone; the client will not
/// see further output.
#[derive(Debug, PartialEq, Eq)]
pub struct BodyClosed;

/// The producer half of a channel body.
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<Bytes>,
}

impl BodySender {
    /// Push one chunk to the client.
    ///
    /// Fails once the response body has been dropped, which is how a client
    /// disconnect surfaces on the producing side.
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), BodyClosed> {
        self.tx.send(chunk.into()).await.map_err(|_| BodyClosed)
    }
}

/// Router response body.
///
/// Implements [`http_body::Body`] so it can be used directly with hyper
/// responses.
#[derive(Default)]
pub enum RouterBody {
    /// Buffered body for small responses.
    Buffered(Full<Bytes>),
    /// Empty body.
    #[default]
    Empty,
    /// Incrementally produced body; frames arrive over a bounded channel.
    Channel(mpsc::Receiver<Bytes>),
    /// Pass-through of an upstream byte stream.
    Stream(BoxStream<'static, Result<Bytes, std::io::Error>>),
}

impl RouterBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Create a connected producer/body pair for incremental output.
    #[must_use]
    pub fn channel() -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_BODY_CAPACITY);
        (BodySender { tx }, Self::Channel(rx))
    }

    /// Wrap an upstream byte stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }
}

impl http_body::Body for RouterBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Empty => Poll::Ready(None),
            Self::Channel(rx) => match rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
            Self::Stream(stream) => match stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Empty => true,
            Self::Channel(_) | Self::Stream(_) => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Empty => http_body::SizeHint::with_exact(0),
            Self::Channel(_) | Self::Stream(_) => http_body::SizeHint::default(),
        }
    }
}

impl fmt::Debug for RouterBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(full) => f.debug_tuple("Buffered").field(full).finish(),
            Self::Empty => f.write_str("Empty"),
            Self::Channel(_) => f.write_str("Channel(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
