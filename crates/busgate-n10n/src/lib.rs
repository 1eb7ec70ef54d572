//! Notification broker interface for the busgate edge router.
//!
//! Clients subscribe a server-side channel to one or more projection keys
//! and receive offset updates over a Server-Sent Events stream. The broker
//! implementation is opaque to the router; [`NotificationBroker`] is the
//! seam and [`MemoryBroker`] the quota-enforcing in-process implementation
//! used by the binary and the tests.

mod broker;
mod types;

pub use broker::{MemoryBroker, NotificationBroker, UpdateCallback};
pub use types::{ChannelId, N10nError, Offset, ProjectionKey};
