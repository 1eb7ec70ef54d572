//! End-to-end tests for the busgate router.
//!
//! Each test boots the full HTTP service in-process on an ephemeral port,
//! wires it to a scripted bus and in-memory collaborators, and drives it
//! with a real HTTP client. No external services are required.

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use busgate_blob::{BlobOps, MemoryBlobStorage, ProcBus};
use busgate_bus::BusClient;
use busgate_core::RouterConfig;
use busgate_http::blob::BlobWorker;
use busgate_http::{RouterService, ServiceDeps};
use busgate_n10n::MemoryBroker;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A router instance bound to an ephemeral port.
pub struct TestServer {
    /// The bound address.
    pub addr: SocketAddr,
    /// Cancels the accept loop and every in-flight request.
    pub shutdown: CancellationToken,
    /// The blob storage backing the instance.
    pub storage: Arc<MemoryBlobStorage>,
    /// The notification broker backing the instance.
    pub broker: Arc<MemoryBroker>,
}

impl TestServer {
    /// Full URL for a path on this instance.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Default test configuration: one `airs-bp` queue with a single partition.
#[must_use]
pub fn test_config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.queues_partitions.clear();
    config.queues_partitions.insert("airs-bp".to_owned(), 1);
    config
}

/// Boot a router over the given bus with the default test configuration.
pub async fn start_server(bus: Arc<dyn BusClient>) -> TestServer {
    start_server_with(bus, test_config()).await
}

/// Boot a router over the given bus and configuration.
pub async fn start_server_with(bus: Arc<dyn BusClient>, config: RouterConfig) -> TestServer {
    init_tracing();

    let shutdown = CancellationToken::new();
    let storage = Arc::new(MemoryBlobStorage::new());
    let broker = Arc::new(MemoryBroker::new(
        config.n10n.max_channels,
        config.n10n.max_subscriptions_per_channel,
    ));

    let blob_ops = Arc::new(BlobOps::new(
        Arc::clone(&bus),
        Arc::clone(&storage) as _,
        config.blob.cluster_app_id,
        config.blob.max_size,
        config.bus_timeout(),
    ));
    let blob_worker = Arc::new(BlobWorker::new(blob_ops, config.blob.max_size));
    let blob_pool = ProcBus::start(
        config.blob.queue_depth,
        config.blob.workers,
        shutdown.clone(),
        move |job| {
            let worker = Arc::clone(&blob_worker);
            async move { worker.process(job).await }
        },
    );

    let service = RouterService::new(
        &config,
        ServiceDeps {
            bus,
            broker: Arc::clone(&broker) as _,
            blob_jobs: blob_pool.sender(),
            shutdown: shutdown.clone(),
        },
    )
    .expect("service construction");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let accept_shutdown = shutdown.clone();
    tokio::spawn(async move {
        // Keep the worker pool alive for the server's lifetime.
        let _blob_pool = blob_pool;
        let http = HttpConnBuilder::new(TokioExecutor::new());
        loop {
            let (stream, _peer) = tokio::select! {
                () = accept_shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(_) => break,
                },
            };
            let svc = service.clone();
            let http = http.clone();
            tokio::spawn(async move {
                let _ = http.serve_connection(TokioIo::new(stream), svc).await;
            });
        }
    });

    TestServer {
        addr,
        shutdown,
        storage,
        broker,
    }
}

/// Start a mock upstream backend that records the request head of each
/// connection and answers 200 with a fixed body.
///
/// Returns the backend address and a channel yielding the first line of
/// every received request (e.g. `GET /rewritten/foo?x=1 HTTP/1.1`).
pub async fn start_capture_backend(
    response_body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut head = Vec::new();
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&head);
                if let Some(line) = head.lines().next() {
                    let _ = tx.send(line.to_owned());
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response_body.len(),
                    response_body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

mod test_api;
mod test_blob;
mod test_n10n;
mod test_proxy;
mod test_sections;
