//! Reverse-proxy matching and forwarding.
//!
//! Three route maps come from configuration:
//!
//! - *route*: prefix to target URL, incoming path preserved;
//! - *rewrite*: prefix to target URL, prefix replaced by the target's path;
//! - an optional *default* target used when nothing matches, with the whole
//!   incoming path appended to the target's path.
//!
//! Matching picks the longest configured prefix that ends on a `/` segment
//! boundary of the incoming path. On a match the request URL's scheme, host,
//! path, and query are rewritten (queries merged with `&`) and the request
//! is forwarded through one shared client.

use std::collections::HashMap;

use futures_util::TryStreamExt;
use http::uri::{Authority, PathAndQuery, Scheme, Uri};
use http::{Request, Response, StatusCode};
use http_body_util::BodyStream;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error, info};

use busgate_core::BusgateError;

use crate::body::RouterBody;
use crate::response::text_response;

/// A parsed target URL.
#[derive(Debug, Clone)]
struct ProxyTarget {
    scheme: Scheme,
    authority: Authority,
    path: String,
    query: Option<String>,
}

impl ProxyTarget {
    fn parse(url: &str) -> Result<Self, BusgateError> {
        let uri: Uri = url.parse().map_err(|e| BusgateError::RouteTarget {
            url: url.to_owned(),
            reason: format!("{e}"),
        })?;
        let scheme = uri.scheme().cloned().ok_or_else(|| BusgateError::RouteTarget {
            url: url.to_owned(),
            reason: "missing scheme".to_owned(),
        })?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| BusgateError::RouteTarget {
                url: url.to_owned(),
                reason: "missing host".to_owned(),
            })?;
        let path = match uri.path() {
            "/" => String::new(),
            path => path.to_owned(),
        };
        Ok(Self {
            scheme,
            authority,
            path,
            query: uri.query().map(ToOwned::to_owned),
        })
    }
}

#[derive(Debug, Clone)]
struct ProxyRoute {
    target: ProxyTarget,
    is_rewrite: bool,
}

/// The longest-prefix route matcher.
#[derive(Debug, Default)]
pub struct ProxyMatcher {
    routes: HashMap<String, ProxyRoute>,
    default_route: Option<ProxyTarget>,
}

impl ProxyMatcher {
    /// Build the matcher from the three configured maps.
    ///
    /// # Errors
    ///
    /// Rejects prefixes without a leading slash and unparseable target URLs.
    pub fn from_config(
        routes: &HashMap<String, String>,
        rewrites: &HashMap<String, String>,
        default_route: Option<&str>,
    ) -> Result<Self, BusgateError> {
        let mut compiled = HashMap::new();
        for (maps, is_rewrite) in [(routes, false), (rewrites, true)] {
            for (from, to) in maps {
                if !from.starts_with('/') {
                    return Err(BusgateError::RoutePrefix(from.clone()));
                }
                let target = ProxyTarget::parse(to)?;
                info!(from = %from, to = %to, rewrite = is_rewrite, "reverse proxy route registered");
                compiled.insert(from.clone(), ProxyRoute { target, is_rewrite });
            }
        }
        let default_route = default_route
            .map(|url| {
                let target = ProxyTarget::parse(url)?;
                info!(to = %url, "default route registered");
                Ok::<_, BusgateError>(target)
            })
            .transpose()?;
        Ok(Self {
            routes: compiled,
            default_route,
        })
    }

    /// Whether any route or default is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.default_route.is_none()
    }

    /// Compute the target URI for an incoming URI, or `None` when nothing
    /// matches and no default is set.
    #[must_use]
    pub fn target_uri(&self, uri: &Uri) -> Option<Uri> {
        let path = uri.path();

        let mut matched: Option<(&str, &ProxyRoute)> = None;
        let mut boundary = 0;
        for segment in path.split('/').skip(1) {
            boundary += 1 + segment.len();
            let prefix = &path[..boundary];
            if let Some(route) = self.routes.get(prefix) {
                matched = Some((prefix, route));
            }
        }

        let (target, target_path) = match matched {
            Some((prefix, route)) => {
                let target_path = if route.is_rewrite {
                    path.replacen(prefix, &route.target.path, 1)
                } else {
                    path.to_owned()
                };
                (&route.target, target_path)
            }
            None => {
                let target = self.default_route.as_ref()?;
                (target, format!("{}{}", target.path, path))
            }
        };

        let query = merge_query(target.query.as_deref(), uri.query());
        let path_and_query = match query {
            Some(query) => format!("{target_path}?{query}"),
            None => target_path,
        };

        Uri::builder()
            .scheme(target.scheme.clone())
            .authority(target.authority.clone())
            .path_and_query(PathAndQuery::try_from(path_and_query).ok()?)
            .build()
            .ok()
    }
}

/// Merge the target's query with the incoming one.
fn merge_query(target: Option<&str>, incoming: Option<&str>) -> Option<String> {
    match (target, incoming) {
        (None, None) => None,
        (Some(q), None) | (None, Some(q)) => Some(q.to_owned()),
        (Some(t), Some(i)) => Some(format!("{t}&{i}")),
    }
}

/// The forwarding side: one shared client for every proxied request.
pub struct ProxyClient {
    matcher: ProxyMatcher,
    client: Client<HttpConnector, Incoming>,
}

impl ProxyClient {
    /// Wrap a matcher with a shared forwarding client.
    #[must_use]
    pub fn new(matcher: ProxyMatcher) -> Self {
        Self {
            matcher,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }

    /// Whether any route or default is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }

    /// Forward the request if a route matches; `None` means no match.
    pub async fn forward(&self, mut req: Request<Incoming>) -> Option<Response<RouterBody>> {
        let target = self.matcher.target_uri(req.uri())?;
        debug!(method = %req.method(), from = %req.uri(), to = %target, "proxying request");

        *req.uri_mut() = target;
        // The client derives Host from the target URI.
        req.headers_mut().remove(http::header::HOST);

        let response = match self.client.request(req).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "upstream request failed");
                return Some(text_response(
                    StatusCode::BAD_GATEWAY,
                    "upstream request failed",
                ));
            }
        };

        let (parts, body) = response.into_parts();
        let body = RouterBody::from_stream(
            BodyStream::new(body)
                .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) })
                .map_err(std::io::Error::other),
        );
        Some(Response::from_parts(parts, body))
    }
}
