//! The two halves of a streaming reply.
//!
//! [`SectionStream`] is the single consumer: a lazy, finite sequence of
//! sections plus a late error cell populated by the producer right before
//! the stream closes. [`ResultSender`] is the producer half used by bus
//! implementations; it observes consumer loss through failed sends.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{BusError, StreamError};
use crate::section::{
    ArraySection, MapSection, ObjectSection, Section, ELEMENT_CHANNEL_CAPACITY,
};

/// Capacity of the section channel. One in-flight section keeps producers
/// honest about backpressure while still pipelining serialization.
const SECTION_CHANNEL_CAPACITY: usize = 1;

/// Shared late-error slot. Written by the producer before it closes the
/// stream; read by the consumer only after the stream is observed closed.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorCell(Arc<Mutex<Option<StreamError>>>);

impl ErrorCell {
    fn set(&self, err: StreamError) {
        *self.0.lock().expect("error cell poisoned") = Some(err);
    }

    fn get(&self) -> Option<StreamError> {
        self.0.lock().expect("error cell poisoned").clone()
    }
}

/// The consumer half of a streaming reply.
#[derive(Debug)]
pub struct SectionStream {
    rx: mpsc::Receiver<Section>,
    err: ErrorCell,
}

impl SectionStream {
    /// Create a connected producer/consumer pair.
    #[must_use]
    pub fn channel() -> (ResultSender, SectionStream) {
        let (tx, rx) = mpsc::channel(SECTION_CHANNEL_CAPACITY);
        let err = ErrorCell::default();
        (
            ResultSender {
                tx,
                err: err.clone(),
                open_elements: None,
            },
            SectionStream { rx, err },
        )
    }

    /// Next section, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Section> {
        self.rx.recv().await
    }

    /// The late error, if any.
    ///
    /// Only meaningful after [`next`](Self::next) has returned `None`; the
    /// producer populates the cell before closing the stream.
    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.err.get()
    }

    /// Consume the stream to end-of-stream, discarding everything.
    ///
    /// Every exit path of a dispatcher that has begun a streaming reply must
    /// end here, otherwise the producer may stay blocked on a full channel
    /// forever.
    pub async fn drain(&mut self) {
        while let Some(section) = self.next().await {
            section.drain().await;
        }
    }
}

/// Which element channel the producer currently has open.
#[derive(Debug)]
enum OpenElements {
    Array(mpsc::Sender<Bytes>),
    Map(mpsc::Sender<(String, Bytes)>),
}

/// The producer half of a streaming reply.
///
/// Bus implementations translate their transport's section packets into
/// calls on this type. Starting a new section implicitly completes the
/// previous one. Once the consumer is gone every send fails with
/// [`BusError::NoConsumer`].
#[derive(Debug)]
pub struct ResultSender {
    tx: mpsc::Sender<Section>,
    err: ErrorCell,
    open_elements: Option<OpenElements>,
}

impl ResultSender {
    /// Send a complete object section.
    pub async fn object_section(
        &mut self,
        kind: impl Into<String>,
        path: impl Into<Vec<String>>,
        value: impl Serialize,
    ) -> Result<(), BusError> {
        self.open_elements = None;
        let section = Section::Object(ObjectSection {
            kind: kind.into(),
            path: path.into(),
            value: to_json_bytes(&value)?,
        });
        self.send_section(section).await
    }

    /// Open an array section; elements follow via [`send_element`](Self::send_element).
    pub async fn start_array_section(
        &mut self,
        kind: impl Into<String>,
        path: impl Into<Vec<String>>,
    ) -> Result<(), BusError> {
        let (tx, elements) = mpsc::channel(ELEMENT_CHANNEL_CAPACITY);
        let section = Section::Array(ArraySection {
            kind: kind.into(),
            path: path.into(),
            elements,
        });
        self.open_elements = Some(OpenElements::Array(tx));
        self.send_section(section).await
    }

    /// Open a map section; named elements follow via [`send_element`](Self::send_element).
    pub async fn start_map_section(
        &mut self,
        kind: impl Into<String>,
        path: impl Into<Vec<String>>,
    ) -> Result<(), BusError> {
        let (tx, entries) = mpsc::channel(ELEMENT_CHANNEL_CAPACITY);
        let section = Section::Map(MapSection {
            kind: kind.into(),
            path: path.into(),
            entries,
        });
        self.open_elements = Some(OpenElements::Map(tx));
        self.send_section(section).await
    }

    /// Send one element into the currently open array or map section.
    ///
    /// `name` is ignored for array sections.
    pub async fn send_element(&mut self, name: &str, value: impl Serialize) -> Result<(), BusError> {
        let bytes = to_json_bytes(&value)?;
        match &self.open_elements {
            Some(OpenElements::Array(tx)) => {
                tx.send(bytes).await.map_err(|_| BusError::NoConsumer)
            }
            Some(OpenElements::Map(tx)) => tx
                .send((name.to_owned(), bytes))
                .await
                .map_err(|_| BusError::NoConsumer),
            None => Err(BusError::Failed("no open section".to_owned())),
        }
    }

    /// Close the stream, optionally recording a late error.
    ///
    /// Consumes the sender; dropping the internal channels is what the
    /// consumer observes as end-of-stream, so the error cell is written
    /// first.
    pub fn close(mut self, err: Option<StreamError>) {
        if let Some(err) = err {
            self.err.set(err);
        }
        self.open_elements = None;
    }

    async fn send_section(&mut self, section: Section) -> Result<(), BusError> {
        self.tx.send(section).await.map_err(|_| {
            self.open_elements = None;
            BusError::NoConsumer
        })
    }
}

fn to_json_bytes(value: &impl Serialize) -> Result<Bytes, BusError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| BusError::Failed(format!("element serialization failed: {e}")))
}
