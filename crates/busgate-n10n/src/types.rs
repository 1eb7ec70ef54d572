//! Notification domain types.

use std::fmt;

use busgate_core::Wsid;

/// Offset within a projection's update stream.
pub type Offset = i64;

/// Identifies a stream of offsets to observe: `(app, projection, workspace)`.
///
/// Field names match the wire format clients put in the `payload` query
/// parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProjectionKey {
    /// Application name.
    #[serde(rename = "App")]
    pub app: String,
    /// Projection name, e.g. `paa.price`.
    #[serde(rename = "Projection")]
    pub projection: String,
    /// Workspace the projection belongs to.
    #[serde(rename = "WS")]
    pub ws: Wsid,
}

/// A server-side channel handle with a TTL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Mint a fresh channel id.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors surfaced by the notification broker.
#[derive(Debug, thiserror::Error)]
pub enum N10nError {
    /// The channel quota is exhausted.
    #[error("channel quota exceeded")]
    ChannelQuotaExceeded,

    /// The per-channel subscription quota is exhausted.
    #[error("subscription quota exceeded for channel {0}")]
    SubscriptionQuotaExceeded(ChannelId),

    /// No such channel (unknown id or expired).
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
}
