//! TLS provisioning for the overlay :443 listener.
//!
//! No certificate files are read. Material always comes from the overlay
//! network via [`OverlayClient::cert_for`]: the resolver answers handshakes
//! from a per-name cache, and a cache miss kicks off a background fetch
//! while that one handshake fails. The orchestrator prefetches the node's
//! own hostname before accepting, so the first real client normally hits a
//! warm cache. Cached entries are refetched in the background once a day
//! so a long-running server picks up renewed certificates.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ConnectInfo;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::{Mutex, RwLock};
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, warn};

use crate::error::OverlayError;
use crate::overlay::{CertPair, OverlayClient};

/// How long a cached certificate is served before a background refetch.
/// Overlay certificates live for around ninety days; refreshing daily
/// picks up a renewal long before the old one expires.
const CERT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

struct CacheEntry {
    key: Arc<CertifiedKey>,
    fetched: Instant,
}

impl CacheEntry {
    fn new(key: Arc<CertifiedKey>) -> Self {
        Self {
            key,
            fetched: Instant::now(),
        }
    }

    fn stale(&self) -> bool {
        self.fetched.elapsed() >= CERT_REFRESH_INTERVAL
    }
}

/// Per-handshake certificate resolver backed by the overlay network.
pub struct OverlayCertResolver {
    overlay: Arc<dyn OverlayClient>,
    default_name: String,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl fmt::Debug for OverlayCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayCertResolver")
            .field("default_name", &self.default_name)
            .finish_non_exhaustive()
    }
}

impl OverlayCertResolver {
    pub fn new(overlay: Arc<dyn OverlayClient>, default_name: String) -> Arc<Self> {
        Arc::new(Self {
            overlay,
            default_name,
            cache: Arc::new(RwLock::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Fetches and caches the certificate for `name` ahead of the first
    /// handshake.
    pub async fn prefetch(&self, name: &str) -> Result<(), OverlayError> {
        let pair = self.overlay.cert_for(name).await?;
        let key = certified_key_from_pem(&pair, name)?;
        self.cache
            .write()
            .insert(name.to_string(), CacheEntry::new(key));
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn cached(&self, name: &str) -> bool {
        self.cache.read().contains_key(name)
    }

    #[cfg(test)]
    pub(crate) fn refresh_due(&self, name: &str) -> bool {
        self.cache.read().get(name).is_some_and(CacheEntry::stale)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, name: &str) {
        if let Some(entry) = self.cache.write().get_mut(name) {
            entry.fetched = Instant::now() - CERT_REFRESH_INTERVAL;
        }
    }

    fn spawn_fetch(&self, name: String) {
        if !self.inflight.lock().insert(name.clone()) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inflight.lock().remove(&name);
            return;
        };
        let overlay = self.overlay.clone();
        let cache = self.cache.clone();
        let inflight = self.inflight.clone();
        handle.spawn(async move {
            let fetched = match overlay.cert_for(&name).await {
                Ok(pair) => certified_key_from_pem(&pair, &name),
                Err(err) => Err(err),
            };
            match fetched {
                Ok(key) => {
                    cache.write().insert(name.clone(), CacheEntry::new(key));
                }
                Err(err) => warn!("certificate fetch for {name} failed: {err}"),
            }
            inflight.lock().remove(&name);
        });
    }
}

impl ResolvesServerCert for OverlayCertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        let name = client_hello
            .server_name()
            .map(str::to_string)
            .unwrap_or_else(|| self.default_name.clone());
        let hit = {
            let cache = self.cache.read();
            cache.get(&name).map(|entry| (entry.key.clone(), entry.stale()))
        };
        if let Some((key, stale)) = hit {
            if stale {
                // Serve the old certificate while the replacement loads.
                self.spawn_fetch(name);
            }
            return Some(key);
        }
        // This handshake fails; the next one for the same name hits the cache.
        self.spawn_fetch(name);
        None
    }
}

/// Parses a concatenated PEM pair into a rustls [`CertifiedKey`].
pub(crate) fn certified_key_from_pem(
    pair: &CertPair,
    name: &str,
) -> Result<Arc<CertifiedKey>, OverlayError> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &pair.pem[..]).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(OverlayError::Certificate {
            name: name.to_string(),
            reason: "no certificate in PEM material".to_string(),
        });
    }
    let key = rustls_pemfile::private_key(&mut &pair.pem[..])?.ok_or_else(|| {
        OverlayError::Certificate {
            name: name.to_string(),
            reason: "no private key in PEM material".to_string(),
        }
    })?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key).map_err(|err| {
        OverlayError::Certificate {
            name: name.to_string(),
            reason: format!("unsupported private key: {err}"),
        }
    })?;
    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

pub(crate) fn tls_acceptor(resolver: Arc<OverlayCertResolver>) -> TlsAcceptor {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    TlsAcceptor::from(Arc::new(config))
}

/// Accept loop for the TLS-wrapped overlay listener. One task per
/// connection; a handshake failure costs that client only.
pub(crate) async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(err) => {
                    debug!("TLS handshake with {peer} failed: {err}");
                    return;
                }
            };
            let service = hyper::service::service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
                let router = router.clone();
                req.extensions_mut().insert(ConnectInfo::<SocketAddr>(peer));
                let req = req.map(axum::body::Body::new);
                router.oneshot(req)
            });
            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls), service)
                .await
            {
                debug!("connection from {peer} ended: {err}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::mock::MockOverlay;

    fn self_signed_pair() -> Vec<u8> {
        let generated =
            rcgen::generate_simple_self_signed(vec!["hugin.tail1234.ts.net".to_string()]).unwrap();
        let mut pem = generated.cert.pem().into_bytes();
        pem.extend_from_slice(generated.key_pair.serialize_pem().as_bytes());
        pem
    }

    #[test]
    fn pem_pair_parses_to_certified_key() {
        let pair = CertPair {
            pem: self_signed_pair(),
        };
        let key = certified_key_from_pem(&pair, "hugin.tail1234.ts.net").unwrap();
        assert_eq!(key.cert.len(), 1);
    }

    #[test]
    fn garbage_pem_is_a_certificate_error() {
        let pair = CertPair {
            pem: b"not pem at all".to_vec(),
        };
        let err = certified_key_from_pem(&pair, "hugin").unwrap_err();
        assert!(matches!(err, OverlayError::Certificate { .. }));
    }

    #[tokio::test]
    async fn prefetch_warms_the_cache() {
        let overlay = Arc::new(MockOverlay::new().with_cert(self_signed_pair()));
        let resolver = OverlayCertResolver::new(overlay, "hugin.tail1234.ts.net".to_string());

        assert!(!resolver.cached("hugin.tail1234.ts.net"));
        resolver.prefetch("hugin.tail1234.ts.net").await.unwrap();
        assert!(resolver.cached("hugin.tail1234.ts.net"));
    }

    #[tokio::test]
    async fn aged_cache_entry_is_refetched_in_background() {
        let name = "hugin.tail1234.ts.net";
        let overlay = Arc::new(MockOverlay::new().with_cert(self_signed_pair()));
        let resolver = OverlayCertResolver::new(overlay, name.to_string());

        resolver.prefetch(name).await.unwrap();
        assert!(!resolver.refresh_due(name));

        resolver.backdate(name);
        assert!(resolver.refresh_due(name));

        resolver.spawn_fetch(name.to_string());
        for _ in 0..100 {
            if !resolver.refresh_due(name) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The refetched entry carries a fresh timestamp and stays cached.
        assert!(!resolver.refresh_due(name));
        assert!(resolver.cached(name));
    }

    #[tokio::test]
    async fn prefetch_surfaces_issuance_failure() {
        let overlay = Arc::new(MockOverlay::new());
        let resolver = OverlayCertResolver::new(overlay, "hugin".to_string());

        let err = resolver.prefetch("hugin").await.unwrap_err();
        assert!(matches!(err, OverlayError::Certificate { .. }));
        assert!(!resolver.cached("hugin"));
    }
}
