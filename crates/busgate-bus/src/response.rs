//! The response side of the bus wire model.

use bytes::Bytes;
use http::StatusCode;

/// A non-streamed reply from a business processor.
///
/// For streamed replies the interesting payload arrives as a
/// [`SectionStream`](crate::SectionStream) and this carries only the status.
#[derive(Debug, Clone)]
pub struct BusResponse {
    /// Status code to relay to the client.
    pub status: StatusCode,
    /// Content type of `body`; empty means unspecified.
    pub content_type: String,
    /// Body bytes, relayed verbatim.
    pub body: Bytes,
}

impl BusResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// A bare 200 with no body, the default companion of a section stream.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK, "", Bytes::new())
    }
}

impl Default for BusResponse {
    fn default() -> Self {
        Self::ok()
    }
}
