//! Response construction helpers shared by all handlers.

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};

use crate::body::RouterBody;

pub(crate) const CONTENT_TYPE_TEXT: &str = "text/plain";
pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";

/// Build a plain-text response.
pub(crate) fn text_response(status: StatusCode, msg: impl Into<String>) -> Response<RouterBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, CONTENT_TYPE_TEXT)
        .body(RouterBody::from_string(msg))
        .expect("static response parts are valid")
}

/// 401 with the canonical body.
pub(crate) fn unauthorized() -> Response<RouterBody> {
    text_response(StatusCode::UNAUTHORIZED, "not authorized")
}

/// 503 with a `Retry-After` hint, sent when the blob queue is full.
pub(crate) fn service_unavailable(retry_after_secs: u64) -> Response<RouterBody> {
    let mut resp = Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(RouterBody::empty())
        .expect("static response parts are valid");
    resp.headers_mut().insert(
        "Retry-After",
        HeaderValue::from_str(&retry_after_secs.to_string())
            .unwrap_or(HeaderValue::from_static("1")),
    );
    resp
}

/// 404 for paths nothing claims.
pub(crate) fn not_found() -> Response<RouterBody> {
    text_response(StatusCode::NOT_FOUND, "404 page not found")
}

/// Add the CORS headers served on `/api` and `/blob` responses.
pub(crate) fn add_cors_headers(response: &mut Response<RouterBody>) {
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "Access-Control-Allow-Credentials",
        HeaderValue::from_static("true"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("POST, GET, OPTIONS, PUT, PATCH"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(
            "Accept, Content-Type, Content-Length, Accept-Encoding, Authorization",
        ),
    );
}

/// The short-circuit response for CORS preflight requests.
pub(crate) fn preflight_response() -> Response<RouterBody> {
    let mut resp = Response::builder()
        .status(StatusCode::OK)
        .body(RouterBody::empty())
        .expect("static response parts are valid");
    add_cors_headers(&mut resp);
    resp
}

/// Stamp the request id onto a response.
pub(crate) fn add_request_id(response: &mut Response<RouterBody>, request_id: &str) {
    if let Ok(hv) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert("x-request-id", hv);
    }
}
