//! Typed, path-tagged fragments of a streaming reply.
//!
//! A section is one of three shapes: a single JSON value, an ordered array
//! of values, or an ordered map of named values. Array and map elements
//! arrive lazily over a bounded channel and are consumed exactly once, in
//! production order. Value bytes are JSON fragments already validated by the
//! producer; the router never parses them.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of the per-section element channel. Kept small so a stalled
/// consumer exerts backpressure on the producer instead of buffering.
pub(crate) const ELEMENT_CHANNEL_CAPACITY: usize = 1;

/// A fragment of a streaming reply.
#[derive(Debug)]
pub enum Section {
    /// A single JSON value.
    Object(ObjectSection),
    /// An ordered sequence of JSON values.
    Array(ArraySection),
    /// An ordered sequence of named JSON values.
    Map(MapSection),
}

impl Section {
    /// The section's type tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Object(s) => &s.kind,
            Self::Array(s) => &s.kind,
            Self::Map(s) => &s.kind,
        }
    }

    /// The section's path: an ordered sequence of strings.
    #[must_use]
    pub fn path(&self) -> &[String] {
        match self {
            Self::Object(s) => &s.path,
            Self::Array(s) => &s.path,
            Self::Map(s) => &s.path,
        }
    }

    /// Consume and discard any pending elements so the producer is never
    /// left blocked on a full element channel.
    pub async fn drain(self) {
        match self {
            Self::Object(_) => {}
            Self::Array(mut s) => while s.next().await.is_some() {},
            Self::Map(mut s) => while s.next().await.is_some() {},
        }
    }
}

/// A section holding a single JSON value.
#[derive(Debug)]
pub struct ObjectSection {
    /// Type tag.
    pub kind: String,
    /// Path metadata.
    pub path: Vec<String>,
    /// The value, a JSON fragment.
    pub value: Bytes,
}

/// A section streaming an ordered array of JSON values.
#[derive(Debug)]
pub struct ArraySection {
    /// Type tag.
    pub kind: String,
    /// Path metadata.
    pub path: Vec<String>,
    pub(crate) elements: mpsc::Receiver<Bytes>,
}

impl ArraySection {
    /// Next element, or `None` once the section is complete.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.elements.recv().await
    }
}

/// A section streaming an ordered map of named JSON values.
#[derive(Debug)]
pub struct MapSection {
    /// Type tag.
    pub kind: String,
    /// Path metadata.
    pub path: Vec<String>,
    pub(crate) entries: mpsc::Receiver<(String, Bytes)>,
}

impl MapSection {
    /// Next `(name, value)` pair, or `None` once the section is complete.
    pub async fn next(&mut self) -> Option<(String, Bytes)> {
        self.entries.recv().await
    }
}
