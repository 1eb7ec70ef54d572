//! BLOB endpoint handlers and the worker-side job processing.
//!
//! The request handler does the cheap part inline: bearer-token extraction,
//! upload-flavour detection, and a non-blocking submit onto the bounded job
//! queue (full queue → 503 with `Retry-After`). It then parks on the job's
//! done signal or the request token, whichever fires first. A worker picks
//! the job up, runs the authorisation round-trip and the storage transfer
//! through [`BlobOps`], and resolves the done signal with the final
//! response — exactly once per job, guaranteed by the oneshot.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::BodyStream;
use hyper::body::Incoming;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use busgate_blob::{
    byte_stream, multipart_boundary, parse_first_part, BlobByteStream, BlobOps, BlobStorageError,
    DownloadError, ProcBusSender, UploadError,
};
use busgate_core::{bearer_token, AppQName, BlobId, Wsid};

use crate::body::RouterBody;
use crate::response::{service_unavailable, text_response, unauthorized};
use crate::router::decode_uri_component;

/// Slack on top of the size quota when collecting a multipart body: the
/// first part is smaller than the whole body by its framing overhead.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// What a queued job is supposed to do.
#[derive(Debug)]
pub enum BlobJobKind {
    /// Single-blob upload: name and mime type came in query parameters, the
    /// request body is the payload.
    UploadSingle {
        /// Blob name.
        name: String,
        /// Blob mime type.
        mime_type: String,
    },
    /// Multipart upload: only the first part is processed.
    UploadMultipart {
        /// The multipart boundary.
        boundary: String,
    },
    /// Download of a stored blob.
    Download {
        /// The blob to serve.
        blob_id: BlobId,
    },
}

/// A job travelling from the request handler to a worker.
pub struct BlobJob {
    /// What to do.
    pub kind: BlobJobKind,
    /// Owning application.
    pub app: AppQName,
    /// Addressed workspace.
    pub wsid: Wsid,
    /// The bearer token, passed through to the helper command.
    pub principal_token: String,
    /// Headers of the originating request.
    pub headers: HeaderMap,
    /// Per-request cancellation token.
    pub cancel: CancellationToken,
    /// The request body (the payload for uploads).
    pub body: Incoming,
    /// Resolved with the final response; closed exactly once per job.
    pub done: oneshot::Sender<Response<RouterBody>>,
}

/// The handler side of the BLOB pipeline.
pub struct BlobFrontend {
    jobs: ProcBusSender<BlobJob>,
    retry_after_secs: u64,
}

impl BlobFrontend {
    /// Create a frontend submitting into the given queue.
    #[must_use]
    pub fn new(jobs: ProcBusSender<BlobJob>, retry_after_secs: u64) -> Self {
        Self {
            jobs,
            retry_after_secs,
        }
    }

    /// `POST /blob/{owner}/{app}/{wsid}` — upload.
    pub async fn handle_upload(
        &self,
        req: Request<Incoming>,
        app: AppQName,
        wsid: Wsid,
        cancel: CancellationToken,
    ) -> Response<RouterBody> {
        let Some(principal_token) = header_auth(req.headers()) else {
            return unauthorized();
        };

        let kind = match upload_kind(&req) {
            Ok(kind) => kind,
            Err(msg) => return text_response(StatusCode::BAD_REQUEST, msg),
        };

        self.submit(req, kind, app, wsid, principal_token, cancel)
            .await
    }

    /// `GET|POST /blob/{owner}/{app}/{wsid}/{blobID}` — download.
    pub async fn handle_download(
        &self,
        req: Request<Incoming>,
        app: AppQName,
        wsid: Wsid,
        blob_id: BlobId,
        cancel: CancellationToken,
    ) -> Response<RouterBody> {
        let principal_token = match header_or_cookie_auth(req.method(), req.headers()) {
            Ok(token) => token,
            Err(resp) => return resp,
        };

        self.submit(
            req,
            BlobJobKind::Download { blob_id },
            app,
            wsid,
            principal_token,
            cancel,
        )
        .await
    }

    async fn submit(
        &self,
        req: Request<Incoming>,
        kind: BlobJobKind,
        app: AppQName,
        wsid: Wsid,
        principal_token: String,
        cancel: CancellationToken,
    ) -> Response<RouterBody> {
        let (parts, body) = req.into_parts();
        let (done_tx, done_rx) = oneshot::channel();
        let job = BlobJob {
            kind,
            app,
            wsid,
            principal_token,
            headers: parts.headers,
            cancel: cancel.clone(),
            body,
            done: done_tx,
        };

        if self.jobs.try_submit(job).is_err() {
            warn!("blob queue full, rejecting request");
            return service_unavailable(self.retry_after_secs);
        }

        tokio::select! {
            done = done_rx => done.unwrap_or_else(|_| {
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "blob worker dropped the job")
            }),
            () = cancel.cancelled() => {
                debug!("request cancelled while blob job in flight");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "request cancelled")
            }
        }
    }
}

/// The worker side: processes one job end to end.
pub struct BlobWorker {
    ops: Arc<BlobOps>,
    max_size: u64,
}

impl BlobWorker {
    /// Create a worker over the shared blob operations.
    #[must_use]
    pub fn new(ops: Arc<BlobOps>, max_size: u64) -> Self {
        Self { ops, max_size }
    }

    /// Process a job and resolve its done signal.
    pub async fn process(&self, job: BlobJob) {
        let BlobJob {
            kind,
            app,
            wsid,
            principal_token,
            headers,
            cancel,
            body,
            done,
        } = job;

        let response = match kind {
            BlobJobKind::UploadSingle { name, mime_type } => {
                self.upload(
                    cancel,
                    wsid,
                    app,
                    &principal_token,
                    headers,
                    name,
                    mime_type,
                    incoming_stream(body),
                )
                .await
            }
            BlobJobKind::UploadMultipart { boundary } => {
                match collect_capped(body, self.max_size.saturating_add(MULTIPART_OVERHEAD)).await {
                    Ok(bytes) => match parse_first_part(&bytes, &boundary) {
                        Ok(part) => {
                            self.upload(
                                cancel,
                                wsid,
                                app,
                                &principal_token,
                                headers,
                                part.name,
                                part.content_type,
                                byte_stream(part.data),
                            )
                            .await
                        }
                        Err(e) => text_response(StatusCode::BAD_REQUEST, e.to_string()),
                    },
                    Err(resp) => resp,
                }
            }
            BlobJobKind::Download { blob_id } => {
                self.download(cancel, wsid, app, &principal_token, blob_id)
                    .await
            }
        };

        let _ = done.send(response);
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload(
        &self,
        cancel: CancellationToken,
        wsid: Wsid,
        app: AppQName,
        principal_token: &str,
        headers: HeaderMap,
        name: String,
        mime_type: String,
        data: BlobByteStream,
    ) -> Response<RouterBody> {
        match self
            .ops
            .upload(
                cancel,
                wsid,
                app,
                principal_token,
                headers,
                name,
                mime_type,
                data,
            )
            .await
        {
            Ok(blob_id) => text_response(StatusCode::OK, blob_id.to_string()),
            Err(err @ UploadError::QuotaExceeded { .. }) => {
                text_response(StatusCode::FORBIDDEN, err.to_string())
            }
            Err(err) => text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }

    async fn download(
        &self,
        cancel: CancellationToken,
        wsid: Wsid,
        app: AppQName,
        principal_token: &str,
        blob_id: BlobId,
    ) -> Response<RouterBody> {
        match self
            .ops
            .download(cancel, wsid, app, principal_token, blob_id)
            .await
        {
            Ok(download) => {
                let disposition = format!("attachment;filename=\"{}\"", download.name);
                let mut builder = Response::builder().status(StatusCode::OK);
                if let Ok(hv) = HeaderValue::from_str(&download.mime_type) {
                    builder = builder.header(CONTENT_TYPE, hv);
                }
                if let Ok(hv) = HeaderValue::from_str(&disposition) {
                    builder = builder.header("Content-Disposition", hv);
                }
                let data = download.data.map(|chunk| {
                    chunk.map_err(|e| std::io::Error::other(e.to_string()))
                });
                builder
                    .body(RouterBody::from_stream(data))
                    .unwrap_or_else(|_| {
                        text_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid blob descriptor")
                    })
            }
            Err(DownloadError::NotFound) => {
                text_response(StatusCode::NOT_FOUND, DownloadError::NotFound.to_string())
            }
            Err(err) => text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

/// Decide the upload flavour from query parameters and the Content-Type
/// header; exactly one flavour must apply.
fn upload_kind<B>(req: &Request<B>) -> Result<BlobJobKind, String> {
    let query = req.uri().query().unwrap_or("");
    let params = crate::router::parse_query_params(query);
    let name = params.iter().find(|(k, _)| k == "name").map(|(_, v)| v);
    let mime_type = params.iter().find(|(k, _)| k == "mimeType").map(|(_, v)| v);

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match (name, mime_type) {
        (Some(name), Some(mime_type)) => {
            if !content_type.is_empty() {
                return Err(
                    "name+mimeType query params and multipart/form-data Content-Type header are mutual exclusive"
                        .to_owned(),
                );
            }
            Ok(BlobJobKind::UploadSingle {
                name: name.clone(),
                mime_type: mime_type.clone(),
            })
        }
        (None, None) => {
            if content_type.is_empty() {
                return Err(
                    r#"neither "name"+"mimeType" query params nor Content-Type header is provided"#
                        .to_owned(),
                );
            }
            match multipart_boundary(content_type) {
                Some(boundary) => Ok(BlobJobKind::UploadMultipart { boundary }),
                None => Err(format!("unsupported Content-Type: {content_type}")),
            }
        }
        _ => Err("both name and mimeType query params must be specified".to_owned()),
    }
}

/// Bearer token from the `Authorization` header; `None` covers both a
/// missing header and a malformed scheme.
fn header_auth(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    bearer_token(value).map(ToOwned::to_owned)
}

/// Header auth, falling back to the URL-encoded `Authorization` cookie for
/// GET requests.
fn header_or_cookie_auth(
    method: &Method,
    headers: &HeaderMap,
) -> Result<String, Response<RouterBody>> {
    if headers.contains_key(AUTHORIZATION) {
        return header_auth(headers).ok_or_else(unauthorized);
    }

    if *method == Method::GET {
        if let Some(raw) = cookie_value(headers, "Authorization") {
            let value = decode_uri_component(&raw);
            return bearer_token(&value)
                .map(ToOwned::to_owned)
                .ok_or_else(unauthorized);
        }
    }

    Err(unauthorized())
}

/// Find a cookie by name in the `Cookie` header(s).
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(http::header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            let Some((k, v)) = pair.trim().split_once('=') else {
                continue;
            };
            if k == name {
                return Some(v.to_owned());
            }
        }
    }
    None
}

/// Turn the request body into a storage byte stream.
fn incoming_stream(body: Incoming) -> BlobByteStream {
    Box::pin(BodyStream::new(body).filter_map(|frame| async move {
        match frame {
            Ok(frame) => frame.into_data().ok().map(Ok),
            Err(e) => Some(Err(BlobStorageError::Backend(e.to_string()))),
        }
    }))
}

/// Collect an upload body, bouncing anything over `cap` as a quota error.
async fn collect_capped(body: Incoming, cap: u64) -> Result<Bytes, Response<RouterBody>> {
    let mut stream = BodyStream::new(body);
    let mut buf = Vec::new();
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                return Err(text_response(
                    StatusCode::BAD_REQUEST,
                    format!("can't read request body: {e}"),
                ))
            }
        };
        let Ok(data) = frame.into_data() else { continue };
        if buf.len() as u64 + data.len() as u64 > cap {
            return Err(text_response(
                StatusCode::FORBIDDEN,
                format!("blob size quota exceeded (max {cap} allowed)"),
            ));
        }
        buf.extend_from_slice(&data);
    }
    Ok(Bytes::from(buf))
}
