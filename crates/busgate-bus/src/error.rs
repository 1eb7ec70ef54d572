//! Error types for bus invocation and streaming replies.

/// Errors surfaced by a [`BusClient`](crate::BusClient) call or by the
/// producer half of a section stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The bus did not deliver the first response within the timeout.
    #[error("first response read failed: timeout expired")]
    Timeout,

    /// The bus call failed outright.
    #[error("{0}")]
    Failed(String),

    /// The consumer of the stream is gone; nobody will read further output.
    #[error("no consumer")]
    NoConsumer,
}

impl BusError {
    /// Build a [`BusError::Failed`] from anything displayable.
    #[must_use]
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}

/// A late error attached to a section stream after it closes.
///
/// When `data` carries a JSON object, the section writer splices its fields
/// into the response trailer instead of the default
/// `"status":500,"errorDescription":…` pair.
#[derive(Debug, Clone)]
pub struct StreamError {
    /// Human-readable description, rendered as `errorDescription`.
    pub message: String,
    /// Optional structured form of the error.
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl StreamError {
    /// Create a plain stream error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Create a stream error carrying a structured JSON object.
    #[must_use]
    pub fn with_data(
        message: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<BusError> for StreamError {
    fn from(err: BusError) -> Self {
        Self::new(err.to_string())
    }
}
