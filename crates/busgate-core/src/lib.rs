//! Core types and configuration for the busgate edge router.
//!
//! This crate provides the foundational building blocks shared across the
//! busgate crates: the router configuration, the error type used by startup
//! code, and small domain newtypes (workspace ids, app-qualified names,
//! bearer-token extraction).

mod config;
mod error;
mod types;

pub use config::{BlobConfig, N10nConfig, RouterConfig};
pub use error::{BusgateError, BusgateResult};
pub use types::{bearer_token, AppQName, BlobId, Wsid, BEARER_PREFIX};
