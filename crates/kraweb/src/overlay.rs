//! The overlay network collaborator.
//!
//! Everything the server needs from the private network is behind
//! [`OverlayClient`]: joining under a hostname, listeners bound to the
//! overlay interface, per-handshake certificate material, and identity
//! lookup by remote address. The production implementation lives in
//! [`crate::localapi`]; tests use a scripted mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::OverlayError;

/// Authenticated identity of an overlay peer, resolved per request.
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Login name of the connecting user, e.g. `ada@example.com`.
    pub login_name: String,
    /// Computed display name of the device, e.g. `adas-laptop.tail1234.ts.net`.
    pub computed_name: String,
    /// Raw remote address observed at the HTTP layer.
    pub remote_addr: String,
}

impl Identity {
    /// First dot-delimited label of the device name.
    pub fn device_label(&self) -> &str {
        first_label(&self.computed_name)
    }
}

/// Text before the first `.`, or the whole string when there is none.
pub fn first_label(s: &str) -> &str {
    s.split('.').next().unwrap_or(s)
}

/// PEM-encoded certificate chain and private key, concatenated the way the
/// overlay network hands them out.
#[derive(Debug, Clone)]
pub struct CertPair {
    pub pem: Vec<u8>,
}

/// Interface to the overlay network. Implementations must be safe for
/// concurrent use: the certificate resolver and identity lookup are called
/// from many connection tasks at once.
#[async_trait]
pub trait OverlayClient: Send + Sync {
    /// Establish membership under `hostname`, authenticating with
    /// `auth_key` when given. A failure here is fatal to the whole server;
    /// the orchestrator starts no listener after it.
    async fn join(
        &self,
        hostname: &str,
        auth_key: Option<&str>,
        control_url: &str,
        verbose: bool,
    ) -> Result<(), OverlayError>;

    /// A listener bound to the overlay interface. May fail per port
    /// without invalidating other ports.
    async fn listen(&self, port: u16) -> Result<TcpListener, OverlayError>;

    /// Certificate material for `server_name`, issued by the overlay
    /// network. A failure affects one TLS handshake only.
    async fn cert_for(&self, server_name: &str) -> Result<CertPair, OverlayError>;

    /// Resolve the identity behind `remote_addr`. A failure is surfaced to
    /// the single requesting handler, never to the server.
    async fn whois(&self, remote_addr: &str) -> Result<Identity, OverlayError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_label_cuts_at_first_dot() {
        assert_eq!(first_label("adas-laptop.tail1234.ts.net"), "adas-laptop");
        assert_eq!(first_label("bare"), "bare");
        assert_eq!(first_label(""), "");
        assert_eq!(first_label(".leading"), "");
    }

    #[test]
    fn device_label_uses_computed_name() {
        let identity = Identity {
            login_name: "ada@example.com".to_string(),
            computed_name: "adas-laptop.tail1234.ts.net".to_string(),
            remote_addr: "100.64.0.7:51442".to_string(),
        };
        assert_eq!(identity.device_label(), "adas-laptop");
    }
}
