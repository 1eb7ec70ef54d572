//! The JSON framing state machine.
//!
//! Turns a section stream into a single well-formed JSON object on the
//! response body, no matter where the stream is cut short. The writer is a
//! byte-level state machine, not a document builder: memory use is
//! independent of reply size, and every piece is pushed to the client as its
//! own body frame.
//!
//! Framing rules:
//!
//! - nothing written yet, stream ends cleanly: `{}`;
//! - nothing written yet, stream ends with an error:
//!   `{"status":500,"errorDescription":"…"}`;
//! - sections were written: `{"sections":[…]}`, with the error trailer
//!   appended inside the array's parent object when the stream errors:
//!   `…],"status":500,"errorDescription":"…"}`.
//!
//! A structured stream error replaces the two default trailer fields with
//! its own, spliced in without their surrounding braces.
//!
//! Cancellation discipline: if the child token fires, pending sections are
//! not emitted; the writer closes the JSON best-effort and drains the stream
//! so the producer never blocks on a full channel. A failed write to the
//! client cancels the child token and drains likewise. The token is always
//! cancelled on exit so the upstream producer stops.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use busgate_bus::{ArraySection, MapSection, Section, SectionStream, StreamError};

use crate::body::BodySender;

/// How writing one section ended.
enum SectionOutcome {
    /// Section fully written.
    Written,
    /// The client is gone; stop writing.
    ClientGone,
    /// An element did not arrive in time. The section was closed to keep
    /// the JSON well-formed.
    TimedOut,
}

/// How the whole stream ended.
enum StreamOutcome {
    /// Stream closed; the late error cell decides the trailer.
    Closed,
    /// A read timed out; `StreamError` becomes the trailer.
    TimedOut,
    /// The child token fired.
    Cancelled,
    /// A write failed.
    ClientGone,
}

/// Drive a section stream to completion, writing the framed JSON document
/// into `body`.
///
/// `step_timeout` bounds the wait for each section and each element;
/// exceeding it surfaces as an embedded stream error, never as an HTTP
/// error, because the 200 status is already committed.
pub async fn write_sectioned_response(
    body: BodySender,
    cancel: CancellationToken,
    mut stream: SectionStream,
    step_timeout: Duration,
) {
    let mut opened = false;

    let outcome = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break StreamOutcome::Cancelled,
            next = timeout(step_timeout, stream.next()) => next,
        };

        let section = match next {
            Err(_elapsed) => break StreamOutcome::TimedOut,
            Ok(None) => break StreamOutcome::Closed,
            Ok(Some(section)) => section,
        };

        // Priority rule: a cancelled request never emits another section.
        // Dropping the section closes its element channels, which is what
        // unblocks a producer mid-send.
        if cancel.is_cancelled() {
            drop(section);
            break StreamOutcome::Cancelled;
        }

        let prefix = if opened { "," } else { r#"{"sections":["# };
        if body.send(prefix).await.is_err() {
            drop(section);
            break StreamOutcome::ClientGone;
        }
        opened = true;

        match write_section(&body, section, step_timeout).await {
            SectionOutcome::Written => {}
            SectionOutcome::ClientGone => break StreamOutcome::ClientGone,
            SectionOutcome::TimedOut => break StreamOutcome::TimedOut,
        }
    };

    match outcome {
        StreamOutcome::Closed => {
            let tail = closing(opened, stream.error());
            let _ = body.send(tail).await;
        }
        StreamOutcome::TimedOut => {
            error!("section read failed: timeout expired");
            let err = StreamError::new("section read failed: timeout expired");
            let tail = closing(opened, Some(err));
            let _ = body.send(tail).await;
        }
        StreamOutcome::Cancelled => {
            // Best effort: the client may already be gone, but whatever was
            // sent stays a single JSON object.
            let _ = body.send(closing(opened, None)).await;
        }
        StreamOutcome::ClientGone => {
            debug!("response write failed, dropping remaining sections");
        }
    }

    // The producer must stop and the stream must reach end-of-stream on
    // every path, or upstream worker tasks stay blocked on a full channel.
    // Cancelling first is what makes the drain terminate: the producer
    // observes the token, stops, and closes the stream.
    cancel.cancel();
    stream.drain().await;
}

/// Serialize one section. The opening `{"type":…` chunk is written first;
/// elements follow one frame each; the closing braces depend on the shape.
async fn write_section(
    body: &BodySender,
    section: Section,
    step_timeout: Duration,
) -> SectionOutcome {
    let mut head = Vec::with_capacity(64);
    head.extend_from_slice(b"{\"type\":");
    head.extend_from_slice(json_string(section.kind()).as_bytes());
    let path = section.path();
    if !path.is_empty() {
        head.extend_from_slice(b",\"path\":[");
        for (i, p) in path.iter().enumerate() {
            if i > 0 {
                head.push(b',');
            }
            head.extend_from_slice(json_string(p).as_bytes());
        }
        head.push(b']');
    }
    if body.send(head).await.is_err() {
        return SectionOutcome::ClientGone;
    }

    match section {
        Section::Object(s) => {
            let mut chunk = Vec::with_capacity(s.value.len() + 16);
            chunk.extend_from_slice(b",\"elements\":");
            chunk.extend_from_slice(&s.value);
            chunk.push(b'}');
            if body.send(chunk).await.is_err() {
                return SectionOutcome::ClientGone;
            }
            SectionOutcome::Written
        }
        Section::Array(s) => write_array_elements(body, s, step_timeout).await,
        Section::Map(s) => write_map_elements(body, s, step_timeout).await,
    }
}

async fn write_array_elements(
    body: &BodySender,
    mut section: ArraySection,
    step_timeout: Duration,
) -> SectionOutcome {
    let mut first = true;
    loop {
        match timeout(step_timeout, section.next()).await {
            Err(_elapsed) => {
                let _ = body.send(close_array(first)).await;
                return SectionOutcome::TimedOut;
            }
            Ok(None) => {
                if body.send(close_array(first)).await.is_err() {
                    return SectionOutcome::ClientGone;
                }
                return SectionOutcome::Written;
            }
            Ok(Some(value)) => {
                let mut chunk = Vec::with_capacity(value.len() + 14);
                if first {
                    chunk.extend_from_slice(b",\"elements\":[");
                } else {
                    chunk.push(b',');
                }
                chunk.extend_from_slice(&value);
                if body.send(chunk).await.is_err() {
                    return SectionOutcome::ClientGone;
                }
                first = false;
            }
        }
    }
}

async fn write_map_elements(
    body: &BodySender,
    mut section: MapSection,
    step_timeout: Duration,
) -> SectionOutcome {
    let mut first = true;
    loop {
        match timeout(step_timeout, section.next()).await {
            Err(_elapsed) => {
                let _ = body.send(close_map(first)).await;
                return SectionOutcome::TimedOut;
            }
            Ok(None) => {
                if body.send(close_map(first)).await.is_err() {
                    return SectionOutcome::ClientGone;
                }
                return SectionOutcome::Written;
            }
            Ok(Some((name, value))) => {
                let name = json_string(&name);
                let mut chunk = Vec::with_capacity(name.len() + value.len() + 15);
                if first {
                    chunk.extend_from_slice(b",\"elements\":{");
                } else {
                    chunk.push(b',');
                }
                chunk.extend_from_slice(name.as_bytes());
                chunk.push(b':');
                chunk.extend_from_slice(&value);
                if body.send(chunk).await.is_err() {
                    return SectionOutcome::ClientGone;
                }
                first = false;
            }
        }
    }
}

/// Close an array section: no `elements` key was opened for zero elements.
fn close_array(empty: bool) -> &'static [u8] {
    if empty {
        b"}"
    } else {
        b"]}"
    }
}

/// Close a map section likewise.
fn close_map(empty: bool) -> &'static [u8] {
    if empty {
        b"}"
    } else {
        b"}}"
    }
}

/// The document tail: closes the sections array when one was opened and
/// renders the trailer for a late error.
fn closing(opened: bool, err: Option<StreamError>) -> Bytes {
    let trailer = err.map(|err| match err.data {
        Some(data) => data
            .iter()
            .map(|(k, v)| format!("{}:{v}", json_string(k)))
            .collect::<Vec<_>>()
            .join(","),
        None => format!(
            r#""status":500,"errorDescription":{}"#,
            json_string(&err.message)
        ),
    });

    let tail = match (opened, trailer) {
        (false, None) => "{}".to_owned(),
        (false, Some(trailer)) => format!("{{{trailer}}}"),
        (true, None) => "]}".to_owned(),
        (true, Some(trailer)) => format!("],{trailer}}}"),
    };
    Bytes::from(tail)
}

/// Standard JSON string encoding, UTF-8 preserving.
fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_owned())
}
