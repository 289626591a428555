//! Error taxonomy: fatal server errors vs. overlay collaborator failures.

use thiserror::Error;

/// Errors that abort the server. Anything not in here is either logged and
/// tolerated (an overlay port failing to bind) or answered to a single
/// caller (a failed identity lookup).
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before any network activity.
    #[error("configuration error: {0}")]
    Config(String),

    /// The overlay network refused us or could not be reached. No listener
    /// is started after this.
    #[error("failed to join overlay network: {0}")]
    Join(#[source] OverlayError),

    /// The loopback (or dev) listener could not bind. Unlike the overlay
    /// ports this one is fatal.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A serving listener terminated.
    #[error("listener terminated: {0}")]
    Serve(#[source] std::io::Error),
}

/// Failures surfaced by the overlay network collaborator.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("join failed: {0}")]
    Join(String),

    #[error("listen on overlay port {port} failed: {source}")]
    Listen {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate issuance for {name} failed: {reason}")]
    Certificate { name: String, reason: String },

    #[error("identity lookup for {addr} failed: {reason}")]
    WhoIs { addr: String, reason: String },

    #[error("localapi request failed: {0}")]
    LocalApi(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
