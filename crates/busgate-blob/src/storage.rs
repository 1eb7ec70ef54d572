//! The BLOB storage seam.
//!
//! Storage is addressed by `(cluster app id, workspace, blob id)` and keeps a
//! descriptor plus a completion state next to the payload. Only blobs in the
//! `Completed` state are served to clients; anything else surfaces as an
//! error upstream.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, Stream, StreamExt};

use busgate_core::{BlobId, Wsid};

/// Storage key: `(cluster app id, workspace, blob id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey {
    /// Cluster-wide application id blobs are stored under.
    pub app_id: u32,
    /// Owning workspace.
    pub wsid: Wsid,
    /// Blob record id.
    pub blob_id: BlobId,
}

/// Blob descriptor: what the client supplied at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescr {
    /// File name, echoed in `Content-Disposition` on download.
    pub name: String,
    /// Mime type, echoed in `Content-Type` on download.
    pub mime_type: String,
}

/// Completion state of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStatus {
    /// Upload still in flight.
    Pending,
    /// Fully written; servable.
    Completed,
}

/// State surfaced by the backend when a blob is read.
#[derive(Debug, Clone)]
pub struct BlobState {
    /// The blob's descriptor.
    pub descr: BlobDescr,
    /// Completion status.
    pub status: BlobStatus,
    /// Backend-recorded error, if any.
    pub error: Option<String>,
    /// Payload size in bytes.
    pub size: u64,
}

/// Errors surfaced by the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum BlobStorageError {
    /// No blob under the requested key.
    #[error("blob not found")]
    NotFound,

    /// The payload exceeded the allowed maximum.
    #[error("blob size quota exceeded (max {max} allowed)")]
    SizeQuotaExceeded {
        /// The configured maximum, bytes.
        max: u64,
    },

    /// Anything else the backend reports.
    #[error("{0}")]
    Backend(String),
}

/// The byte stream flowing into or out of storage.
pub type BlobByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BlobStorageError>> + Send>>;

/// A blob read result: state first, then the payload stream.
pub struct BlobContent {
    /// Descriptor, status and size.
    pub state: BlobState,
    /// The payload.
    pub data: BlobByteStream,
}

impl std::fmt::Debug for BlobContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobContent")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Interface to the BLOB storage backend.
///
/// `write` consumes the payload stream and must enforce `max_size`,
/// reporting [`BlobStorageError::SizeQuotaExceeded`] without buffering the
/// excess. Futures are boxed so the trait can be used as
/// `Arc<dyn BlobStorage>`.
pub trait BlobStorage: Send + Sync + 'static {
    /// Store a blob under `key`, returning the number of bytes written.
    fn write(
        &self,
        key: BlobKey,
        descr: BlobDescr,
        data: BlobByteStream,
        max_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, BlobStorageError>> + Send + '_>>;

    /// Read the blob stored under `key`.
    fn read(
        &self,
        key: BlobKey,
    ) -> Pin<Box<dyn Future<Output = Result<BlobContent, BlobStorageError>> + Send + '_>>;
}

/// A stored blob in the in-memory backend.
#[derive(Debug, Clone)]
struct StoredBlob {
    descr: BlobDescr,
    status: BlobStatus,
    error: Option<String>,
    data: Bytes,
}

/// In-memory [`BlobStorage`] implementation.
#[derive(Debug, Default)]
pub struct MemoryBlobStorage {
    blobs: DashMap<BlobKey, StoredBlob>,
}

impl MemoryBlobStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob in a given state, bypassing the write path. Lets tests
    /// exercise the pending/errored read behaviour.
    pub fn insert_with_status(
        &self,
        key: BlobKey,
        descr: BlobDescr,
        status: BlobStatus,
        error: Option<String>,
        data: impl Into<Bytes>,
    ) {
        self.blobs.insert(
            key,
            StoredBlob {
                descr,
                status,
                error,
                data: data.into(),
            },
        );
    }
}

impl BlobStorage for MemoryBlobStorage {
    fn write(
        &self,
        key: BlobKey,
        descr: BlobDescr,
        mut data: BlobByteStream,
        max_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<u64, BlobStorageError>> + Send + '_>> {
        Box::pin(async move {
            let mut buf = Vec::new();
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                if buf.len() as u64 + chunk.len() as u64 > max_size {
                    return Err(BlobStorageError::SizeQuotaExceeded { max: max_size });
                }
                buf.extend_from_slice(&chunk);
            }
            let size = buf.len() as u64;
            self.blobs.insert(
                key,
                StoredBlob {
                    descr,
                    status: BlobStatus::Completed,
                    error: None,
                    data: Bytes::from(buf),
                },
            );
            Ok(size)
        })
    }

    fn read(
        &self,
        key: BlobKey,
    ) -> Pin<Box<dyn Future<Output = Result<BlobContent, BlobStorageError>> + Send + '_>> {
        Box::pin(async move {
            let stored = self
                .blobs
                .get(&key)
                .map(|entry| entry.clone())
                .ok_or(BlobStorageError::NotFound)?;
            let state = BlobState {
                descr: stored.descr,
                status: stored.status,
                error: stored.error,
                size: stored.data.len() as u64,
            };
            let data: BlobByteStream = Box::pin(stream::iter([Ok(stored.data)]));
            Ok(BlobContent { state, data })
        })
    }
}

/// Wrap ready bytes as a [`BlobByteStream`].
#[must_use]
pub fn byte_stream(data: impl Into<Bytes>) -> BlobByteStream {
    Box::pin(stream::iter([Ok(data.into())]))
}
