//! BLOB pipeline building blocks for the busgate edge router.
//!
//! Uploads and downloads run on a fixed pool of workers consuming a bounded
//! in-memory queue ([`ProcBus`]). Each job first authorises itself through a
//! helper command on the message bus, then streams bytes between the client
//! and the storage backend. The backend itself is opaque: [`BlobStorage`] is
//! the seam, with [`MemoryBlobStorage`] as the in-process implementation
//! used by tests and development.

mod multipart;
mod ops;
mod queue;
mod storage;

pub use multipart::{multipart_boundary, parse_first_part, FirstPart, MultipartError};
pub use ops::{BlobDownload, BlobOps, DownloadError, UploadError};
pub use queue::{ProcBus, ProcBusSender};
pub use storage::{
    byte_stream, BlobByteStream, BlobContent, BlobDescr, BlobKey, BlobState, BlobStatus,
    BlobStorage, BlobStorageError, MemoryBlobStorage,
};
