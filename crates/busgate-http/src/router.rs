//! Route resolution: method and path to a routed request.
//!
//! The route table is fixed at construction and examines:
//!
//! - the leading path segment (`api`, `blob`, `n10n`);
//! - segment shapes: workspace ids and blob ids must be decimal, resource
//!   names are restricted to `[a-zA-Z_/.]`;
//! - the routing mode: legacy queue-alias dispatch or app-qualified
//!   dispatch, chosen once in configuration.
//!
//! Anything the table does not claim resolves to [`RoutedRequest::NoMatch`]
//! and falls through to the reverse proxy.

use http::{Method, Uri};
use percent_encoding::percent_decode_str;

use busgate_core::{AppQName, BlobId, Wsid};

/// Where a dispatch request is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Legacy routing: a queue alias, partitioned by workspace id.
    Queue(String),
    /// New routing: an app-qualified name, no partition derived.
    App(AppQName),
}

/// The result of routing an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedRequest {
    /// `POST /api/check` liveness probe.
    ApiCheck,
    /// `GET|POST /api` queue enumeration.
    QueueNames,
    /// Partitioned or app-qualified dispatch to a business processor.
    Dispatch {
        /// Queue alias or app-qualified name.
        target: DispatchTarget,
        /// Addressed workspace.
        wsid: Wsid,
        /// Resource within the workspace; may be empty in legacy mode.
        resource: String,
    },
    /// `POST /blob/{owner}/{app}/{wsid}` upload.
    BlobUpload {
        /// Owning application.
        app: AppQName,
        /// Addressed workspace.
        wsid: Wsid,
    },
    /// `GET|POST /blob/{owner}/{app}/{wsid}/{blobID}` download.
    BlobDownload {
        /// Owning application.
        app: AppQName,
        /// Addressed workspace.
        wsid: Wsid,
        /// The blob to serve.
        blob_id: BlobId,
    },
    /// `GET /n10n/channel` subscribe-and-watch.
    N10nChannel,
    /// `GET /n10n/subscribe`.
    N10nSubscribe,
    /// `GET /n10n/unsubscribe`.
    N10nUnsubscribe,
    /// `POST /n10n/update/{offset}` (development aid).
    N10nUpdate {
        /// The offset to record.
        offset: i64,
    },
    /// Nothing claimed the path; the reverse proxy gets a chance.
    NoMatch,
}

/// The route table. Built once at prepare time, immutable afterwards.
#[derive(Debug, Clone)]
pub struct Router {
    use_app_qualified_routing: bool,
}

impl Router {
    /// Create a router in the configured dispatch mode.
    #[must_use]
    pub fn new(use_app_qualified_routing: bool) -> Self {
        Self {
            use_app_qualified_routing,
        }
    }

    /// Resolve a request to a route.
    #[must_use]
    pub fn resolve(&self, method: &Method, uri: &Uri) -> RoutedRequest {
        let path = uri.path();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.split_first() {
            Some((&"api", rest)) => self.resolve_api(method, rest),
            Some((&"blob", rest)) => resolve_blob(method, rest),
            Some((&"n10n", rest)) => resolve_n10n(method, rest),
            _ => RoutedRequest::NoMatch,
        }
    }

    fn resolve_api(&self, method: &Method, segments: &[&str]) -> RoutedRequest {
        match segments {
            [] if *method == Method::GET || *method == Method::POST => RoutedRequest::QueueNames,
            ["check"] if *method == Method::POST => RoutedRequest::ApiCheck,
            _ if *method != Method::POST && *method != Method::PATCH => RoutedRequest::NoMatch,
            _ if self.use_app_qualified_routing => resolve_app_dispatch(segments),
            _ => resolve_queue_dispatch(segments),
        }
    }
}

/// Legacy mode: `/api/{queue-alias}/{wsid}[/{resource}]`.
fn resolve_queue_dispatch(segments: &[&str]) -> RoutedRequest {
    let [alias, wsid, resource @ ..] = segments else {
        return RoutedRequest::NoMatch;
    };
    let Some(wsid) = parse_wsid(wsid) else {
        return RoutedRequest::NoMatch;
    };
    let Some(resource) = join_resource(resource) else {
        return RoutedRequest::NoMatch;
    };
    RoutedRequest::Dispatch {
        target: DispatchTarget::Queue((*alias).to_owned()),
        wsid,
        resource,
    }
}

/// App-qualified mode: `/api/{owner}/{app}/{wsid}/{resource}`.
fn resolve_app_dispatch(segments: &[&str]) -> RoutedRequest {
    let [owner, name, wsid, resource @ ..] = segments else {
        return RoutedRequest::NoMatch;
    };
    let Some(wsid) = parse_wsid(wsid) else {
        return RoutedRequest::NoMatch;
    };
    let Some(resource) = join_resource(resource) else {
        return RoutedRequest::NoMatch;
    };
    if resource.is_empty() {
        return RoutedRequest::NoMatch;
    }
    RoutedRequest::Dispatch {
        target: DispatchTarget::App(AppQName::new(*owner, *name)),
        wsid,
        resource,
    }
}

fn resolve_blob(method: &Method, segments: &[&str]) -> RoutedRequest {
    match segments {
        [owner, name, wsid] if *method == Method::POST => match parse_wsid(wsid) {
            Some(wsid) => RoutedRequest::BlobUpload {
                app: AppQName::new(*owner, *name),
                wsid,
            },
            None => RoutedRequest::NoMatch,
        },
        [owner, name, wsid, blob_id] if *method == Method::GET || *method == Method::POST => {
            match (parse_wsid(wsid), parse_decimal(blob_id)) {
                (Some(wsid), Some(blob_id)) => RoutedRequest::BlobDownload {
                    app: AppQName::new(*owner, *name),
                    wsid,
                    blob_id: BlobId::new(blob_id),
                },
                _ => RoutedRequest::NoMatch,
            }
        }
        _ => RoutedRequest::NoMatch,
    }
}

fn resolve_n10n(method: &Method, segments: &[&str]) -> RoutedRequest {
    match segments {
        ["channel"] if *method == Method::GET => RoutedRequest::N10nChannel,
        ["subscribe"] if *method == Method::GET => RoutedRequest::N10nSubscribe,
        ["unsubscribe"] if *method == Method::GET => RoutedRequest::N10nUnsubscribe,
        ["update", offset] if *method == Method::POST => match parse_decimal(offset) {
            Some(offset) => RoutedRequest::N10nUpdate { offset },
            None => RoutedRequest::NoMatch,
        },
        _ => RoutedRequest::NoMatch,
    }
}

/// A workspace id segment: decimal digits only.
fn parse_wsid(segment: &str) -> Option<Wsid> {
    parse_decimal(segment).map(Wsid::new)
}

fn parse_decimal(segment: &str) -> Option<i64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Join resource segments back into a path, validating the charset.
/// `None` means the segments do not form a valid resource name.
fn join_resource(segments: &[&str]) -> Option<String> {
    let resource = segments.join("/");
    if resource
        .bytes()
        .all(|b| b.is_ascii_alphabetic() || b == b'_' || b == b'/' || b == b'.')
    {
        Some(resource)
    } else {
        None
    }
}

/// Parse a query string into decoded key-value pairs, in request order.
#[must_use]
pub fn parse_query_params(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }

    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            if let Some((key, value)) = pair.split_once('=') {
                (decode_uri_component(key), decode_uri_component(value))
            } else {
                (decode_uri_component(pair), String::new())
            }
        })
        .collect()
}

/// Decode a percent-encoded URI component. `+` decodes to a space, matching
/// how clients URL-encode the `payload` parameter.
#[must_use]
pub fn decode_uri_component(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_decode_str(&s).decode_utf8_lossy().into_owned()
}
