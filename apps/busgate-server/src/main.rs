//! Busgate server — HTTP/HTTPS edge router for business processors.
//!
//! Clients speak plain HTTP; business processors are reached over an
//! internal queue/partition bus with streaming multi-section replies. The
//! binary wires the HTTP service to its collaborators and runs the accept
//! loop. The bus transport is a seam: until a transport-backed `BusClient`
//! is attached, a development bus answers every dispatch with a single
//! echo section, which is enough to exercise the full streaming pipeline.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUSGATE_PORT` | `8822` | Listen port; `443` enables TLS mode |
//! | `BUSGATE_READ_TIMEOUT` | `15` | Header read timeout, seconds |
//! | `BUSGATE_WRITE_TIMEOUT` | `15` | Graceful-shutdown drain budget, seconds |
//! | `BUSGATE_CONNECTIONS_LIMIT` | `10000` | Concurrent connection cap; `0` disables |
//! | `BUSGATE_QUEUES` | `airs-bp=100` | Queue to partition count |
//! | `BUSGATE_APP_ROUTING` | `false` | App-qualified dispatch paths |
//! | `BUSGATE_ROUTES` / `BUSGATE_ROUTES_REWRITE` / `BUSGATE_ROUTE_DEFAULT` | *(empty)* | Reverse proxy |
//! | `BUSGATE_BLOB_*` | see config | BLOB pipeline settings |
//! | `BUSGATE_N10N_*` | see config | Notification quotas |
//! | `LOG_LEVEL` / `RUST_LOG` | `info` | Log filtering |

mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use busgate_blob::{BlobOps, MemoryBlobStorage, ProcBus};
use busgate_bus::{BusClient, ScriptedBus};
use busgate_core::RouterConfig;
use busgate_http::blob::BlobWorker;
use busgate_http::{RouterService, ServiceDeps, SUBSCRIPTIONS_CLOSE_CHECK_INTERVAL};
use busgate_n10n::{MemoryBroker, NotificationBroker};

/// Server version reported in the startup log.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the configured log level
/// (`debug` when verbose mode is on).
fn init_tracing(config: &RouterConfig) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = if config.verbose {
            "debug"
        } else {
            &config.log_level
        };
        EnvFilter::try_new(level).with_context(|| format!("invalid log level filter: {level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// The development bus: echoes every dispatch back as one object section.
///
/// Stands in until a transport-backed [`BusClient`] is attached; keeps the
/// whole streaming pipeline exercisable from a bare checkout.
fn development_bus() -> Arc<dyn BusClient> {
    Arc::new(ScriptedBus::streaming(|_cancel, request, mut sender| async move {
        let echo = json!({
            "resource": request.resource,
            "wsid": request.wsid,
            "partition": request.partition,
        });
        if sender
            .object_section("echo", Vec::new(), echo)
            .await
            .is_err()
        {
            return;
        }
        sender.close(None);
    }))
}

/// Run the accept loop until the shutdown token fires.
async fn serve(
    listener: TcpListener,
    service: RouterService,
    config: &RouterConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let tls_config = if config.tls_enabled() {
        Some(tls::server_config(
            &config.cert_dir,
            &config.http01_challenge_hosts,
        )?)
    } else {
        None
    };
    let tls_acceptor = tls_config.map(tokio_rustls::TlsAcceptor::from);

    // Connection cap: permits held for the connection's lifetime.
    let permits = match usize::try_from(config.connections_limit) {
        Ok(limit) if limit > 0 => Some(Arc::new(Semaphore::new(limit))),
        _ => None,
    };

    let graceful = GracefulShutdown::new();
    let mut http = HttpConnBuilder::new(TokioExecutor::new());
    http.http1()
        .timer(TokioTimer::new())
        .header_read_timeout(Duration::from_secs(config.read_timeout_secs));
    http.http2().timer(TokioTimer::new());

    loop {
        let permit = match &permits {
            Some(semaphore) => {
                let semaphore = Arc::clone(semaphore);
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    permit = semaphore.acquire_owned() => {
                        Some(permit.expect("connection semaphore never closes"))
                    }
                }
            }
            None => None,
        };

        let (stream, peer_addr) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
        };

        let svc = service.clone();
        let http = http.clone();
        let tls_acceptor = tls_acceptor.clone();
        let watcher = graceful.watcher();

        tokio::spawn(async move {
            let _permit = permit;
            match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => {
                        let conn = http.serve_connection(TokioIo::new(stream), svc);
                        if let Err(e) = watcher.watch(conn.into_owned()).await {
                            warn!(peer_addr = %peer_addr, error = %e, "connection error");
                        }
                    }
                    Err(e) => {
                        warn!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                    }
                },
                None => {
                    let conn = http.serve_connection(TokioIo::new(stream), svc);
                    if let Err(e) = watcher.watch(conn.into_owned()).await {
                        warn!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                }
            }
        });
    }

    // Drain in-flight requests within the write-timeout budget; force-close
    // whatever is left.
    info!("draining connections");
    let drain = graceful.shutdown();
    if tokio::time::timeout(Duration::from_secs(config.write_timeout_secs), drain)
        .await
        .is_err()
    {
        warn!("graceful shutdown timed out, closing remaining connections");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = RouterConfig::from_env();
    init_tracing(&config)?;

    let shutdown = CancellationToken::new();

    // Collaborators. The bus transport, blob storage backend, and broker
    // are opaque seams; the in-process implementations serve development
    // and tests.
    let bus = development_bus();
    let storage = Arc::new(MemoryBlobStorage::new());
    let broker: Arc<dyn NotificationBroker> = Arc::new(MemoryBroker::new(
        config.n10n.max_channels,
        config.n10n.max_subscriptions_per_channel,
    ));

    // BLOB worker pool.
    let blob_ops = Arc::new(BlobOps::new(
        Arc::clone(&bus),
        storage,
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
            broker: Arc::clone(&broker),
            blob_jobs: blob_pool.sender(),
            shutdown: shutdown.clone(),
        },
    )?;

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        %addr,
        version = VERSION,
        tls = config.tls_enabled(),
        connections_limit = config.connections_limit,
        "starting busgate server",
    );

    // TLS mode gets the ACME companion on port 80.
    if config.tls_enabled() {
        let store: Arc<dyn tls::ChallengeStore> = Arc::new(tls::MemoryChallengeStore::default());
        let companion_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tls::run_acme_companion(store, companion_shutdown).await {
                error!(error = %e, "ACME companion server failed");
            }
        });
    }

    // Trigger shutdown on Ctrl+C.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        signal_shutdown.cancel();
    });

    serve(listener, service, &config, shutdown.clone()).await?;

    // Stop order: HTTP drained above; now the blob workers, then wait for
    // the broker to release every subscription.
    blob_pool.join().await;
    while broker.subscription_count() > 0 {
        tokio::time::sleep(SUBSCRIPTIONS_CLOSE_CHECK_INTERVAL).await;
    }

    info!("shutdown complete");
    Ok(())
}
