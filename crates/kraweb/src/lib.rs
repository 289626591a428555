//! kraweb, a dual-surface HTTP server.
//!
//! Serves one set of handlers on a local loopback port and a superset of
//! them over a private overlay network, where callers are authenticated by
//! the network itself. The overlay surface gets plaintext (:80) and TLS
//! (:443) listeners with certificates issued dynamically per handshake.
//!
//! Handlers are registered with a [`registry::Visibility`]: `Public` entries
//! appear on every listener, `OverlayOnly` entries are reachable only
//! through the overlay. That split is the one security boundary here and the
//! two routing tables are never merged.

pub mod config;
pub mod debug;
pub mod error;
pub mod localapi;
pub mod metrics;
pub mod overlay;
pub mod registry;
pub mod server;
pub mod tls;
pub mod who;

pub use config::{KrawebConfig, DEFAULT_HOSTNAME, DEFAULT_LOCAL_PORT};
pub use error::{Error, OverlayError};
pub use localapi::{LocalApiClient, TailscaledOverlay, DEFAULT_LOCALAPI_SOCKET};
pub use metrics::ServerMetrics;
pub use overlay::{CertPair, Identity, OverlayClient};
pub use registry::{HandlerRegistry, HandlerService, Visibility};
pub use server::{KraWeb, ListenerOutcome, ListenerRole, RunningServer};
