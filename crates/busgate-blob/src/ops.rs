//! Upload and download operations.
//!
//! Both operations follow the same discipline: a helper command on the bus
//! authorises the principal token (and, for uploads, allocates a fresh blob
//! id), then bytes stream between the client and the storage backend.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use busgate_bus::{BusClient, BusRequest, BusResponse};
use busgate_core::{AppQName, BlobId, Wsid};

use crate::storage::{
    BlobByteStream, BlobContent, BlobDescr, BlobKey, BlobStatus, BlobStorage, BlobStorageError,
};

/// Helper command authorising an upload and allocating the blob id.
const UPLOAD_HELPER: &str = "c.sys.uploadBLOBHelper";
/// Helper command authorising a download.
const DOWNLOAD_HELPER: &str = "c.sys.downloadBLOBHelper";

/// Errors from the upload path.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The helper command could not be executed or rejected the request.
    #[error("{0}")]
    Helper(String),

    /// The payload exceeded the configured maximum.
    #[error("blob size quota exceeded (max {max} allowed)")]
    QuotaExceeded {
        /// The configured maximum, bytes.
        max: u64,
    },

    /// The storage backend failed.
    #[error("{0}")]
    Storage(String),
}

/// Errors from the download path.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The helper command could not be executed or rejected the request.
    #[error("{0}")]
    Helper(String),

    /// No blob under the requested id.
    #[error("blob not found")]
    NotFound,

    /// The blob exists but is not servable.
    #[error("{0}")]
    NotServable(String),

    /// The storage backend failed.
    #[error("{0}")]
    Storage(String),
}

/// A servable download: descriptor plus payload stream.
pub struct BlobDownload {
    /// File name for `Content-Disposition`.
    pub name: String,
    /// Mime type for `Content-Type`.
    pub mime_type: String,
    /// The payload.
    pub data: BlobByteStream,
}

impl std::fmt::Debug for BlobDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobDownload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// The blob operations shared by all workers.
pub struct BlobOps {
    bus: Arc<dyn BusClient>,
    storage: Arc<dyn BlobStorage>,
    cluster_app_id: u32,
    max_size: u64,
    bus_timeout: Duration,
}

impl BlobOps {
    /// Wire the operations to a bus and a storage backend.
    #[must_use]
    pub fn new(
        bus: Arc<dyn BusClient>,
        storage: Arc<dyn BlobStorage>,
        cluster_app_id: u32,
        max_size: u64,
        bus_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            storage,
            cluster_app_id,
            max_size,
            bus_timeout,
        }
    }

    /// Authorise and store an upload; returns the allocated blob id.
    pub async fn upload(
        &self,
        cancel: CancellationToken,
        wsid: Wsid,
        app: AppQName,
        principal_token: &str,
        headers: HeaderMap,
        name: String,
        mime_type: String,
        data: BlobByteStream,
    ) -> Result<BlobId, UploadError> {
        let response = self
            .helper_roundtrip(cancel, wsid, &app, principal_token, headers, UPLOAD_HELPER)
            .await
            .map_err(UploadError::Helper)?;

        let blob_id = parse_new_id(&response.body).ok_or_else(|| {
            UploadError::Helper(format!(
                "failed to parse {UPLOAD_HELPER} result: {}",
                String::from_utf8_lossy(&response.body)
            ))
        })?;

        let key = BlobKey {
            app_id: self.cluster_app_id,
            wsid,
            blob_id,
        };
        let descr = BlobDescr { name, mime_type };

        debug!(%wsid, %blob_id, "writing blob");
        match self.storage.write(key, descr, data, self.max_size).await {
            Ok(_) => Ok(blob_id),
            Err(BlobStorageError::SizeQuotaExceeded { max }) => {
                Err(UploadError::QuotaExceeded { max })
            }
            Err(e) => Err(UploadError::Storage(e.to_string())),
        }
    }

    /// Authorise and open a download.
    pub async fn download(
        &self,
        cancel: CancellationToken,
        wsid: Wsid,
        app: AppQName,
        principal_token: &str,
        blob_id: BlobId,
    ) -> Result<BlobDownload, DownloadError> {
        self.helper_roundtrip(
            cancel,
            wsid,
            &app,
            principal_token,
            HeaderMap::new(),
            DOWNLOAD_HELPER,
        )
        .await
        .map_err(DownloadError::Helper)?;

        let key = BlobKey {
            app_id: self.cluster_app_id,
            wsid,
            blob_id,
        };
        let BlobContent { state, data } = match self.storage.read(key).await {
            Ok(content) => content,
            Err(BlobStorageError::NotFound) => return Err(DownloadError::NotFound),
            Err(e) => return Err(DownloadError::Storage(e.to_string())),
        };

        if state.status != BlobStatus::Completed {
            return Err(DownloadError::NotServable("blob is not completed".to_owned()));
        }
        if let Some(error) = state.error {
            return Err(DownloadError::NotServable(error));
        }

        Ok(BlobDownload {
            name: state.descr.name,
            mime_type: state.descr.mime_type,
            data,
        })
    }

    /// Run one authorisation helper command; `Err` carries the text for the
    /// client-facing 500 body.
    async fn helper_roundtrip(
        &self,
        cancel: CancellationToken,
        wsid: Wsid,
        app: &AppQName,
        principal_token: &str,
        headers: HeaderMap,
        helper: &str,
    ) -> Result<BusResponse, String> {
        let body = json!({"args": {"principalToken": principal_token}});
        let mut request = BusRequest::new(Method::POST, wsid).with_app(app.clone());
        request.resource = helper.to_owned();
        request.headers = headers;
        request.body = Bytes::from(body.to_string());

        let reply = self
            .bus
            .send(cancel, request, self.bus_timeout)
            .await
            .map_err(|e| format!("failed to exec {helper}: {e}"))?;

        if reply.response.status != StatusCode::OK {
            return Err(format!(
                "{helper} returned error: {}",
                String::from_utf8_lossy(&reply.response.body)
            ));
        }
        Ok(reply.response)
    }
}

/// Pull the freshly allocated blob id out of the helper's
/// `{"newIDs":{"1":<id>}}` reply.
fn parse_new_id(body: &[u8]) -> Option<BlobId> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let id = value.get("newIDs")?.get("1")?.as_i64()?;
    Some(BlobId::new(id))
}
