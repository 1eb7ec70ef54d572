//! TLS mode and the ACME companion server.
//!
//! When the configured port is the TLS well-known port the container
//! terminates TLS itself (minimum version 1.2) and answers `GetCertificate`
//! only for allow-listed hostnames. The certificate/challenge machinery is
//! opaque: the companion HTTP server on port 80 serves HTTP-01 challenge
//! responses straight out of a [`ChallengeStore`].

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use dashmap::DashMap;
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use busgate_http::RouterBody;

/// Read/write timeouts of the ACME companion server.
const ACME_SERVER_TIMEOUT: Duration = Duration::from_secs(5);
/// Well-known path prefix of the HTTP-01 challenge.
const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Storage for HTTP-01 challenge responses.
///
/// The certificate engine (an external collaborator) writes tokens here; the
/// companion server reads them. The in-memory implementation is all the
/// router itself needs.
pub trait ChallengeStore: Send + Sync + 'static {
    /// The response body for a challenge token, if known.
    fn response(&self, token: &str) -> Option<String>;

    /// Record a challenge response.
    fn put(&self, token: String, response: String);
}

/// In-memory [`ChallengeStore`].
#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    tokens: DashMap<String, String>,
}

impl ChallengeStore for MemoryChallengeStore {
    fn response(&self, token: &str) -> Option<String> {
        self.tokens.get(token).map(|entry| entry.clone())
    }

    fn put(&self, token: String, response: String) {
        self.tokens.insert(token, response);
    }
}

/// Certificate resolver restricted to the allow-listed hostnames.
struct AllowListResolver {
    key: Arc<CertifiedKey>,
    hosts: Vec<String>,
}

impl std::fmt::Debug for AllowListResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowListResolver")
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for AllowListResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;
        if self.hosts.iter().any(|host| host == server_name) {
            Some(Arc::clone(&self.key))
        } else {
            debug!(server_name, "rejecting TLS handshake for unlisted host");
            None
        }
    }
}

/// Build the TLS server configuration: certificate from `cert_dir`
/// (`cert.pem`/`key.pem`), SNI restricted to `hosts`, minimum TLS 1.2.
pub fn server_config(cert_dir: &str, hosts: &[String]) -> Result<Arc<ServerConfig>> {
    let cert_path = Path::new(cert_dir).join("cert.pem");
    let key_path = Path::new(cert_dir).join("key.pem");

    let cert_file = File::open(&cert_path)
        .with_context(|| format!("cannot open certificate {}", cert_path.display()))?;
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate chain")?;
    anyhow::ensure!(!cert_chain.is_empty(), "no certificates found in chain");

    let key_file = File::open(&key_path)
        .with_context(|| format!("cannot open private key {}", key_path.display()))?;
    let key: PrivateKeyDer<'static> = private_key(&mut BufReader::new(key_file))
        .context("failed to parse private key")?
        .context("no private key found")?;

    let signing_key = any_supported_type(&key).context("unsupported private key type")?;
    let resolver = AllowListResolver {
        key: Arc::new(CertifiedKey::new(cert_chain, signing_key)),
        hosts: hosts.to_vec(),
    };

    let config = ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_no_client_auth()
    .with_cert_resolver(Arc::new(resolver));

    Ok(Arc::new(config))
}

/// Run the ACME companion server on port 80 until shutdown.
///
/// Serves `GET /.well-known/acme-challenge/{token}` from the store and 404s
/// everything else.
pub async fn run_acme_companion(
    store: Arc<dyn ChallengeStore>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], 80).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind ACME companion to {addr}"))?;
    info!(%addr, "ACME companion server listening");

    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "ACME companion failed to accept connection");
                    continue;
                }
            },
        };

        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let store = Arc::clone(&store);
                async move { Ok::<_, std::convert::Infallible>(challenge_response(&*store, &req)) }
            });
            let conn = hyper::server::conn::http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(ACME_SERVER_TIMEOUT)
                .serve_connection(TokioIo::new(stream), service);
            if let Err(e) = conn.await {
                debug!(peer = %peer, error = %e, "ACME companion connection error");
            }
        });
    }

    Ok(())
}

fn challenge_response<B>(store: &dyn ChallengeStore, req: &Request<B>) -> Response<RouterBody> {
    let token = req
        .uri()
        .path()
        .strip_prefix(ACME_CHALLENGE_PREFIX)
        .filter(|token| !token.is_empty());

    match token.and_then(|token| store.response(token)) {
        Some(body) => Response::builder()
            .status(StatusCode::OK)
            .body(RouterBody::from_string(body))
            .expect("static response parts are valid"),
        None => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(RouterBody::empty())
            .expect("static response parts are valid"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_serve_known_challenge_token() {
        let store = MemoryChallengeStore::default();
        store.put("tok123".to_owned(), "tok123.keyAuth".to_owned());

        let req = Request::builder()
            .uri("/.well-known/acme-challenge/tok123")
            .body(())
            .expect("valid request");
        let resp = challenge_response(&store, &req);
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_should_404_unknown_token_and_other_paths() {
        let store = MemoryChallengeStore::default();

        let req = Request::builder()
            .uri("/.well-known/acme-challenge/missing")
            .body(())
            .expect("valid request");
        assert_eq!(challenge_response(&store, &req).status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .uri("/other")
            .body(())
            .expect("valid request");
        assert_eq!(challenge_response(&store, &req).status(), StatusCode::NOT_FOUND);
    }
}
