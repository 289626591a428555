//! The server orchestrator.
//!
//! Production runs three listeners at once: loopback serving the public
//! table, overlay :80 and overlay :443 (TLS) serving the overlay table.
//! Dev mode replaces all of that with a single plaintext listener serving
//! the overlay table, and never touches the overlay network. The loopback
//! (or dev) bind is fatal when it fails; the overlay binds are best-effort
//! and a failed one simply never serves, without taking the rest down.
//!
//! There is no graceful shutdown: listeners run until the process dies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::KrawebConfig;
use crate::debug::{debug_handler, DebugInfo};
use crate::error::Error;
use crate::metrics::{metrics_handler, track, ServerMetrics};
use crate::overlay::OverlayClient;
use crate::registry::{HandlerRegistry, Visibility};
use crate::tls::{serve_tls, tls_acceptor, OverlayCertResolver};
use crate::who::{who_handler, WhoState};

/// Bound on how long a single request may take; the only backpressure
/// mechanism in the system.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const OVERLAY_HTTP_PORT: u16 = 80;
const OVERLAY_HTTPS_PORT: u16 = 443;

/// One listener slot in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerRole {
    /// Loopback, public table.
    Local,
    /// Overlay :80, overlay table.
    OverlayHttp,
    /// Overlay :443 with TLS, overlay table.
    OverlayHttps,
    /// Single dev-mode listener, overlay table.
    Dev,
}

/// What became of one listener at startup. Collected per listener so
/// partial failure is observable without scraping logs.
#[derive(Debug)]
pub enum ListenerOutcome {
    Bound(SocketAddr),
    BindError(crate::error::OverlayError),
}

impl ListenerOutcome {
    pub fn bound(&self) -> Option<SocketAddr> {
        match self {
            ListenerOutcome::Bound(addr) => Some(*addr),
            ListenerOutcome::BindError(_) => None,
        }
    }
}

/// The dual-surface server: configuration, registered handlers, and the
/// overlay network client, composed at startup.
pub struct KraWeb {
    config: KrawebConfig,
    registry: HandlerRegistry,
    overlay: Arc<dyn OverlayClient>,
    metrics: ServerMetrics,
}

/// Handle to a started server: per-listener outcomes plus the serving
/// tasks. Everything here is read-only after start.
#[derive(Debug)]
pub struct RunningServer {
    outcomes: Vec<(ListenerRole, ListenerOutcome)>,
    tasks: Vec<JoinHandle<std::io::Result<()>>>,
}

impl RunningServer {
    pub fn outcomes(&self) -> &[(ListenerRole, ListenerOutcome)] {
        &self.outcomes
    }

    pub fn bound_addr(&self, role: ListenerRole) -> Option<SocketAddr> {
        self.outcomes
            .iter()
            .find(|(r, _)| *r == role)
            .and_then(|(_, outcome)| outcome.bound())
    }

    /// Blocks until any serving listener terminates. The serve loops only
    /// return on error, so this normally never resolves.
    pub async fn wait(self) -> Result<(), Error> {
        if self.tasks.is_empty() {
            return Ok(());
        }
        let (result, _, _) = futures::future::select_all(self.tasks).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::Serve(err)),
            Err(join_err) => Err(Error::Serve(std::io::Error::new(
                std::io::ErrorKind::Other,
                join_err,
            ))),
        }
    }
}

impl KraWeb {
    pub fn new(
        config: KrawebConfig,
        registry: HandlerRegistry,
        overlay: Arc<dyn OverlayClient>,
    ) -> Self {
        Self {
            config,
            registry,
            overlay,
            metrics: ServerMetrics::new(),
        }
    }

    /// Validates, joins (production), binds every listener, and blocks
    /// serving until a listener fails or the process is killed.
    pub async fn listen_and_serve(self) -> Result<(), Error> {
        self.start().await?.wait().await
    }

    /// Validates, joins (production), and binds every listener, returning
    /// once all serve loops are running.
    pub async fn start(self) -> Result<RunningServer, Error> {
        let KraWeb {
            config,
            mut registry,
            overlay,
            metrics,
        } = self;

        config.validate()?;
        let hostname = config.effective_hostname();

        // Built-ins go into the overlay table only.
        registry.register(
            "/who",
            get(who_handler).with_state(WhoState {
                overlay: overlay.clone(),
                metrics: metrics.clone(),
            }),
            Visibility::OverlayOnly,
        );
        registry.register(
            "/metrics",
            get(metrics_handler).with_state(metrics.clone()),
            Visibility::OverlayOnly,
        );
        let mut routes: Vec<String> = registry.patterns().map(str::to_string).collect();
        routes.push("/debug/".to_string());
        registry.register(
            "/debug/",
            get(debug_handler).with_state(DebugInfo {
                hostname: hostname.clone(),
                started: Instant::now(),
                routes,
            }),
            Visibility::OverlayOnly,
        );

        let (public_table, overlay_table) = registry.build_tables();
        let public_table = public_table
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT));
        let overlay_table = overlay_table
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

        if config.dev_mode() {
            // Dev bypass: one plaintext listener, overlay table, no join.
            let dev_addr = config.dev_bind_addr();
            let listener = TcpListener::bind(dev_addr.as_str()).await.map_err(|source| {
                Error::Bind {
                    addr: dev_addr,
                    source,
                }
            })?;
            let bound = listener.local_addr().map_err(Error::Serve)?;
            info!("running in dev mode on {bound} ...");
            let router = track(overlay_table, metrics, "dev");
            let task = tokio::spawn(serve_plain(listener, router));
            return Ok(RunningServer {
                outcomes: vec![(ListenerRole::Dev, ListenerOutcome::Bound(bound))],
                tasks: vec![task],
            });
        }

        let auth_key = config.load_auth_key()?;
        overlay
            .join(
                &hostname,
                auth_key.as_deref(),
                &config.control_url,
                config.verbose,
            )
            .await
            .map_err(Error::Join)?;

        let mut outcomes = Vec::new();
        let mut tasks = Vec::new();

        match overlay.listen(OVERLAY_HTTP_PORT).await {
            Ok(listener) => {
                let bound = listener.local_addr().map_err(Error::Serve)?;
                info!("serving http://{hostname}/ ...");
                let router = track(overlay_table.clone(), metrics.clone(), "overlay-http");
                tasks.push(tokio::spawn(serve_plain(listener, router)));
                outcomes.push((ListenerRole::OverlayHttp, ListenerOutcome::Bound(bound)));
            }
            Err(err) => {
                warn!("failed to start overlay http listener: {err}");
                outcomes.push((ListenerRole::OverlayHttp, ListenerOutcome::BindError(err)));
            }
        }

        match overlay.listen(OVERLAY_HTTPS_PORT).await {
            Ok(listener) => {
                let bound = listener.local_addr().map_err(Error::Serve)?;
                let resolver = OverlayCertResolver::new(overlay.clone(), hostname.clone());
                if let Err(err) = resolver.prefetch(&hostname).await {
                    warn!("certificate prefetch for {hostname} failed: {err}");
                }
                info!("serving https://{hostname}/ ...");
                let router = track(overlay_table.clone(), metrics.clone(), "overlay-https");
                tasks.push(tokio::spawn(serve_tls(listener, tls_acceptor(resolver), router)));
                outcomes.push((ListenerRole::OverlayHttps, ListenerOutcome::Bound(bound)));
            }
            Err(err) => {
                warn!("failed to start overlay https listener: {err}");
                outcomes.push((ListenerRole::OverlayHttps, ListenerOutcome::BindError(err)));
            }
        }

        // Loopback last, and fatal: a public surface that cannot bind is a
        // startup failure, not a degraded mode.
        let local_addr = format!("{}:{}", config.local_addr, config.local_port);
        let listener = TcpListener::bind(local_addr.as_str())
            .await
            .map_err(|source| Error::Bind {
                addr: local_addr,
                source,
            })?;
        let bound = listener.local_addr().map_err(Error::Serve)?;
        info!("serving http://localhost:{}/ ...", bound.port());
        let router = track(public_table, metrics, "local");
        tasks.push(tokio::spawn(serve_plain(listener, router)));
        outcomes.push((ListenerRole::Local, ListenerOutcome::Bound(bound)));

        Ok(RunningServer { outcomes, tasks })
    }
}

async fn serve_plain(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
