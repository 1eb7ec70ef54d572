//! Configuration for the busgate router.
//!
//! All configuration is driven by environment variables; every option has a
//! deployment-tested default.

use std::collections::HashMap;
use std::time::Duration;

/// Default HTTP port.
const DEFAULT_PORT: u16 = 8822;
/// Port that switches the container into TLS mode.
const HTTPS_PORT: u16 = 443;
/// Default read/write timeouts, seconds. Should stay above the bus timeout
/// so streamed replies are not cut off by the server first.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 15;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 15;
/// Default cap on concurrent connections.
const DEFAULT_CONNECTIONS_LIMIT: i64 = 10_000;
/// Default per-step bus timeout, seconds.
const DEFAULT_BUS_TIMEOUT_SECS: u64 = 10;

/// BLOB pipeline configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobConfig {
    /// Number of worker tasks consuming the job queue.
    pub workers: usize,
    /// Bounded job queue depth. A full queue yields 503.
    pub queue_depth: usize,
    /// Cluster-wide application id blobs are stored under.
    pub cluster_app_id: u32,
    /// `Retry-After` value sent with 503 responses, seconds.
    pub retry_after_secs: u64,
    /// Maximum blob size in bytes. Exceeding it yields 403.
    pub max_size: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_depth: 10,
            cluster_app_id: 1,
            retry_after_secs: 1,
            max_size: 20 * 1024 * 1024,
        }
    }
}

/// Notification broker quotas.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct N10nConfig {
    /// Maximum number of live channels.
    pub max_channels: usize,
    /// Maximum subscriptions per channel.
    pub max_subscriptions_per_channel: usize,
}

impl Default for N10nConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_subscriptions_per_channel: 10_000,
        }
    }
}

/// Root configuration for the busgate router.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Listen port. 443 switches the container into TLS mode.
    pub port: u16,
    /// Socket read timeout, seconds.
    pub read_timeout_secs: u64,
    /// Socket write timeout, seconds.
    pub write_timeout_secs: u64,
    /// Maximum concurrent connections; zero or negative disables the cap.
    pub connections_limit: i64,
    /// Enables debug logging.
    pub verbose: bool,
    /// Queue alias to partition count.
    pub queues_partitions: HashMap<String, u32>,
    /// Route by app-qualified-name instead of queue alias.
    pub use_app_qualified_routing: bool,
    /// Hostnames allowed to answer the HTTP-01 challenge (TLS mode only).
    pub http01_challenge_hosts: Vec<String>,
    /// Directory the certificate cache lives in (TLS mode only).
    pub cert_dir: String,
    /// Reverse-proxy default target URL.
    pub route_default: Option<String>,
    /// Reverse-proxy routes: prefix to target URL, path preserved.
    pub routes: HashMap<String, String>,
    /// Reverse-proxy rewrite routes: prefix to target URL, prefix replaced.
    pub routes_rewrite: HashMap<String, String>,
    /// BLOB pipeline settings.
    pub blob: BlobConfig,
    /// Notification broker quotas.
    pub n10n: N10nConfig,
    /// Per-step bus timeout, seconds.
    pub bus_timeout_secs: u64,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut queues_partitions = HashMap::new();
        queues_partitions.insert("airs-bp".to_owned(), 100);
        Self {
            port: DEFAULT_PORT,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            connections_limit: DEFAULT_CONNECTIONS_LIMIT,
            verbose: false,
            queues_partitions,
            use_app_qualified_routing: false,
            http01_challenge_hosts: Vec::new(),
            cert_dir: ".".to_owned(),
            route_default: None,
            routes: HashMap::new(),
            routes_rewrite: HashMap::new(),
            blob: BlobConfig::default(),
            n10n: N10nConfig::default(),
            bus_timeout_secs: DEFAULT_BUS_TIMEOUT_SECS,
            log_level: "info".to_owned(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("BUSGATE_PORT") {
            config.port = v;
        }
        if let Some(v) = env_parse("BUSGATE_READ_TIMEOUT") {
            config.read_timeout_secs = v;
        }
        if let Some(v) = env_parse("BUSGATE_WRITE_TIMEOUT") {
            config.write_timeout_secs = v;
        }
        if let Some(v) = env_parse("BUSGATE_CONNECTIONS_LIMIT") {
            config.connections_limit = v;
        }
        if let Ok(v) = std::env::var("BUSGATE_VERBOSE") {
            config.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BUSGATE_QUEUES") {
            config.queues_partitions = parse_u32_map(&v);
        }
        if let Ok(v) = std::env::var("BUSGATE_APP_ROUTING") {
            config.use_app_qualified_routing = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("BUSGATE_HTTP01_HOSTS") {
            config.http01_challenge_hosts = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Ok(v) = std::env::var("BUSGATE_CERT_DIR") {
            config.cert_dir = v;
        }
        if let Ok(v) = std::env::var("BUSGATE_ROUTE_DEFAULT") {
            if !v.is_empty() {
                config.route_default = Some(v);
            }
        }
        if let Ok(v) = std::env::var("BUSGATE_ROUTES") {
            config.routes = parse_string_map(&v);
        }
        if let Ok(v) = std::env::var("BUSGATE_ROUTES_REWRITE") {
            config.routes_rewrite = parse_string_map(&v);
        }
        if let Some(v) = env_parse("BUSGATE_BLOB_WORKERS") {
            config.blob.workers = v;
        }
        if let Some(v) = env_parse("BUSGATE_BLOB_QUEUE_DEPTH") {
            config.blob.queue_depth = v;
        }
        if let Some(v) = env_parse("BUSGATE_BLOB_CLUSTER_APP_ID") {
            config.blob.cluster_app_id = v;
        }
        if let Some(v) = env_parse("BUSGATE_BLOB_RETRY_AFTER") {
            config.blob.retry_after_secs = v;
        }
        if let Some(v) = env_parse("BUSGATE_BLOB_MAX_SIZE") {
            config.blob.max_size = v;
        }
        if let Some(v) = env_parse("BUSGATE_N10N_MAX_CHANNELS") {
            config.n10n.max_channels = v;
        }
        if let Some(v) = env_parse("BUSGATE_N10N_MAX_SUBSCRIPTIONS") {
            config.n10n.max_subscriptions_per_channel = v;
        }
        if let Some(v) = env_parse("BUSGATE_BUS_TIMEOUT") {
            config.bus_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Whether the configured port puts the container into TLS mode.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.port == HTTPS_PORT
    }

    /// Per-step bus timeout as a [`Duration`].
    #[must_use]
    pub fn bus_timeout(&self) -> Duration {
        Duration::from_secs(self.bus_timeout_secs)
    }
}

/// Read and parse an environment variable, ignoring unset or malformed values.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Parse a `name=value,name=value` list into a string map.
///
/// Entries without `=` are skipped.
fn parse_string_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (k, v) = entry.split_once('=')?;
            if k.is_empty() || v.is_empty() {
                return None;
            }
            Some((k.to_owned(), v.to_owned()))
        })
        .collect()
}

/// Parse a `name=N,name=N` list into a numeric map.
fn parse_u32_map(raw: &str) -> HashMap<String, u32> {
    parse_string_map(raw)
        .into_iter()
        .filter_map(|(k, v)| Some((k, v.parse().ok()?)))
        .collect()
}
