//! Bus data model and client interface for the busgate edge router.
//!
//! The router talks to business processors over an internal queue/partition
//! bus that supports plain request/response and streaming multi-section
//! replies. This crate defines:
//!
//! - the wire model ([`BusRequest`], [`BusResponse`]);
//! - the section model ([`Section`] and friends): typed, path-tagged
//!   fragments of a streaming reply carrying pre-validated JSON value bytes;
//! - [`SectionStream`], the consumer half of a streaming reply, and
//!   [`ResultSender`], the producer half used by bus implementations;
//! - the [`BusClient`] trait the HTTP layer dispatches through, plus
//!   [`ScriptedBus`], an in-process implementation for tests and development.
//!
//! The transport itself (NATS or otherwise) is out of scope; implementations
//! of [`BusClient`] live elsewhere.

mod client;
mod error;
mod request;
mod response;
mod scripted;
mod section;
mod stream;

pub use client::{BusClient, BusReply};
pub use error::{BusError, StreamError};
pub use request::BusRequest;
pub use response::BusResponse;
pub use scripted::ScriptedBus;
pub use section::{ArraySection, MapSection, ObjectSection, Section};
pub use stream::{ResultSender, SectionStream};
