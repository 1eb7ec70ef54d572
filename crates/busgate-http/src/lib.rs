//! The HTTP layer of the busgate edge router.
//!
//! [`RouterService`] is a hyper service tying everything together:
//!
//! 1. Route resolution ([`router`]): path and method to a routed request.
//! 2. Dispatch ([`dispatch`]): bus invocation and the four-outcome contract
//!    for plain and streamed replies.
//! 3. JSON framing ([`sections`]): the byte-level state machine that turns a
//!    section stream into one well-formed JSON document, flushed as it goes.
//! 4. BLOB handlers ([`blob`]): upload/download jobs over the bounded worker
//!    queue.
//! 5. Notification handlers ([`n10n`]): Server-Sent Events subscription
//!    channels.
//! 6. Reverse proxy ([`proxy`]): longest-prefix matching and forwarding for
//!    everything the route table does not claim.
//!
//! Cancellation is a single tree: the application shutdown token parents a
//! per-request child token; client disconnects and write failures cancel the
//! child, and every streaming path drains its upstream before returning.

pub mod blob;
mod body;
pub mod dispatch;
pub mod n10n;
pub mod proxy;
mod response;
pub mod router;
pub mod sections;
mod service;

pub use body::{BodyClosed, BodySender, RouterBody};
pub use service::{RouterService, ServiceDeps, SUBSCRIPTIONS_CLOSE_CHECK_INTERVAL};
