//! Error types for the busgate core.

/// Core error type for busgate infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum BusgateError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A reverse-proxy route prefix is missing its leading slash.
    #[error("reverse proxy prefix {0:?} must have a leading slash")]
    RoutePrefix(String),

    /// A reverse-proxy target URL could not be parsed.
    #[error("target url {url:?} parse failed: {reason}")]
    RouteTarget { url: String, reason: String },

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for busgate operations.
pub type BusgateResult<T> = Result<T, BusgateError>;
