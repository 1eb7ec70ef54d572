//! The request side of the bus wire model.

use busgate_core::{AppQName, Wsid};
use bytes::Bytes;
use http::{HeaderMap, Method};

/// A request forwarded to a business processor over the bus.
///
/// Exactly one of `queue` (legacy, partitioned routing) or `app`
/// (app-qualified routing) is set by the dispatcher. The partition is only
/// derived in the legacy mode: `wsid % partition-count`.
#[derive(Debug, Clone)]
pub struct BusRequest {
    /// HTTP method of the originating request.
    pub method: Method,
    /// Workspace the request addresses.
    pub wsid: Wsid,
    /// Queue alias (legacy routing).
    pub queue: Option<String>,
    /// App-qualified name (new routing).
    pub app: Option<AppQName>,
    /// Partition the request lands on, when routing by queue.
    pub partition: Option<u32>,
    /// Resource path within the workspace, e.g. `q.sys.Collection`.
    pub resource: String,
    /// Query parameters, in request order.
    pub query: Vec<(String, String)>,
    /// Headers of the originating request.
    pub headers: HeaderMap,
    /// Opaque body bytes.
    pub body: Bytes,
    /// Principal token passed through untouched; authentication policy is
    /// the processor's business.
    pub principal_token: Option<String>,
}

impl BusRequest {
    /// Create a request with the given method and workspace; remaining
    /// fields start empty.
    #[must_use]
    pub fn new(method: Method, wsid: Wsid) -> Self {
        Self {
            method,
            wsid,
            queue: None,
            app: None,
            partition: None,
            resource: String::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            principal_token: None,
        }
    }

    /// Route this request to a partitioned queue, deriving the partition
    /// from the workspace id.
    #[must_use]
    pub fn with_queue(mut self, alias: impl Into<String>, partitions: u32) -> Self {
        self.partition = Some(self.wsid.partition(partitions));
        self.queue = Some(alias.into());
        self
    }

    /// Route this request by app-qualified name; no partition is derived.
    #[must_use]
    pub fn with_app(mut self, app: AppQName) -> Self {
        self.app = Some(app);
        self
    }
}
