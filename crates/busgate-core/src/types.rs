//! Shared domain newtypes.

use std::fmt;
use std::str::FromStr;

/// Workspace identifier: a 64-bit integer identifying a logical tenant.
///
/// The workspace id doubles as the partition key: requests for a queue with
/// `n` partitions land on partition `wsid % n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Wsid(i64);

impl Wsid {
    /// Create a workspace id from a raw value.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Partition number for a queue with `partitions` shards.
    #[must_use]
    pub fn partition(self, partitions: u32) -> u32 {
        (self.0.rem_euclid(i64::from(partitions))) as u32
    }
}

impl FromStr for Wsid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

impl fmt::Display for Wsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// App-qualified name: `owner/name`, identifying a deployed application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct AppQName {
    /// Application owner.
    pub owner: String,
    /// Application name.
    pub name: String,
}

impl AppQName {
    /// Create an app-qualified name.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AppQName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// BLOB record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BlobId(i64);

impl BlobId {
    /// Create a blob id from a raw value.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl FromStr for BlobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `Authorization` scheme prefix accepted by blob endpoints.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Extract the token part from a `Bearer <token>` value.
///
/// Returns `None` when the value does not carry the bearer scheme.
#[must_use]
pub fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix(BEARER_PREFIX)
}
