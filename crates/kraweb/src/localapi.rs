//! Production overlay client: tailscaled's LocalAPI over its unix socket.
//!
//! The node runs tailscaled; this module drives it. Joining posts the auth
//! key and hostname prefs to `/localapi/v0/start` and waits for the backend
//! to report `Running`; listeners bind the node's overlay address;
//! certificates and identity lookups are plain LocalAPI GETs.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, UnixStream};
use tracing::{debug, info};

use crate::error::OverlayError;
use crate::overlay::{CertPair, Identity, OverlayClient};

/// Default tailscaled LocalAPI socket path.
pub const DEFAULT_LOCALAPI_SOCKET: &str = "/var/run/tailscale/tailscaled.sock";

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
const JOIN_POLL_ATTEMPTS: u32 = 120;

/// Minimal HTTP/1 client for the LocalAPI unix socket. One connection per
/// request; the daemon is local so this stays cheap.
pub struct LocalApiClient {
    socket_path: PathBuf,
}

impl LocalApiClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(hyper::StatusCode, Vec<u8>), OverlayError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|err| OverlayError::LocalApi(err.to_string()))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(hyper::header::HOST, "local-tailscaled.sock")
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|err| OverlayError::LocalApi(err.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|err| OverlayError::LocalApi(err.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|err| OverlayError::LocalApi(err.to_string()))?
            .to_bytes();
        Ok((status, bytes.to_vec()))
    }

    async fn get(&self, uri: &str) -> Result<(hyper::StatusCode, Vec<u8>), OverlayError> {
        self.request(Method::GET, uri, None).await
    }
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "BackendState")]
    backend_state: String,
    #[serde(rename = "Self")]
    self_status: Option<PeerStatus>,
}

#[derive(Debug, Deserialize)]
struct PeerStatus {
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WhoIsResponse {
    #[serde(rename = "Node")]
    node: WhoIsNode,
    #[serde(rename = "UserProfile")]
    user_profile: WhoIsUser,
}

#[derive(Debug, Deserialize)]
struct WhoIsNode {
    #[serde(rename = "ComputedName", default)]
    computed_name: String,
}

#[derive(Debug, Deserialize)]
struct WhoIsUser {
    #[serde(rename = "LoginName", default)]
    login_name: String,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    #[serde(rename = "AuthKey", skip_serializing_if = "Option::is_none")]
    auth_key: Option<&'a str>,
    #[serde(rename = "UpdatePrefs")]
    update_prefs: PrefsUpdate<'a>,
}

#[derive(Serialize)]
struct PrefsUpdate<'a> {
    #[serde(rename = "Hostname")]
    hostname: &'a str,
    #[serde(rename = "ControlURL", skip_serializing_if = "str::is_empty")]
    control_url: &'a str,
    #[serde(rename = "WantRunning")]
    want_running: bool,
}

/// [`OverlayClient`] backed by a local tailscaled.
pub struct TailscaledOverlay {
    client: LocalApiClient,
    self_ip: RwLock<Option<IpAddr>>,
}

impl TailscaledOverlay {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            client: LocalApiClient::new(socket_path),
            self_ip: RwLock::new(None),
        }
    }

    async fn status(&self) -> Result<Status, OverlayError> {
        let (status, body) = self.client.get("/localapi/v0/status").await?;
        if !status.is_success() {
            return Err(OverlayError::LocalApi(format!(
                "status returned {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        serde_json::from_slice(&body).map_err(|err| OverlayError::LocalApi(err.to_string()))
    }
}

#[async_trait]
impl OverlayClient for TailscaledOverlay {
    async fn join(
        &self,
        hostname: &str,
        auth_key: Option<&str>,
        control_url: &str,
        verbose: bool,
    ) -> Result<(), OverlayError> {
        // The key can also arrive via TS_AUTHKEY, like the upstream tooling.
        let env_key = std::env::var("TS_AUTHKEY").ok();
        let auth_key = auth_key.or(env_key.as_deref());

        let start = StartRequest {
            auth_key,
            update_prefs: PrefsUpdate {
                hostname,
                control_url,
                want_running: true,
            },
        };
        let body = serde_json::to_vec(&start)
            .map_err(|err| OverlayError::Join(err.to_string()))?;
        let (status, resp) = self
            .client
            .request(Method::POST, "/localapi/v0/start", Some(body))
            .await?;
        if !status.is_success() {
            return Err(OverlayError::Join(format!(
                "start returned {status}: {}",
                String::from_utf8_lossy(&resp)
            )));
        }

        for _ in 0..JOIN_POLL_ATTEMPTS {
            let status = self.status().await?;
            if status.backend_state == "Running" {
                let ip = status
                    .self_status
                    .as_ref()
                    .and_then(|s| s.tailscale_ips.first())
                    .and_then(|ip| ip.parse::<IpAddr>().ok());
                match ip {
                    Some(ip) => {
                        info!("joined overlay network as {hostname} ({ip})");
                        *self.self_ip.write() = Some(ip);
                        return Ok(());
                    }
                    None => {
                        return Err(OverlayError::Join(
                            "backend is Running but reports no overlay address".to_string(),
                        ))
                    }
                }
            }
            if verbose {
                debug!("overlay backend state: {}", status.backend_state);
            }
            tokio::time::sleep(JOIN_POLL_INTERVAL).await;
        }
        Err(OverlayError::Join(
            "timed out waiting for overlay backend to reach Running".to_string(),
        ))
    }

    async fn listen(&self, port: u16) -> Result<TcpListener, OverlayError> {
        let ip = self.self_ip.read().ok_or_else(|| OverlayError::Join(
            "listen called before a successful join".to_string(),
        ))?;
        TcpListener::bind((ip, port))
            .await
            .map_err(|source| OverlayError::Listen { port, source })
    }

    async fn cert_for(&self, server_name: &str) -> Result<CertPair, OverlayError> {
        let (status, body) = self
            .client
            .get(&format!("/localapi/v0/cert/{server_name}?type=pair"))
            .await?;
        if !status.is_success() {
            return Err(OverlayError::Certificate {
                name: server_name.to_string(),
                reason: format!("localapi returned {status}: {}", String::from_utf8_lossy(&body)),
            });
        }
        Ok(CertPair { pem: body })
    }

    async fn whois(&self, remote_addr: &str) -> Result<Identity, OverlayError> {
        let (status, body) = self
            .client
            .get(&format!("/localapi/v0/whois?addr={remote_addr}"))
            .await?;
        if !status.is_success() {
            return Err(OverlayError::WhoIs {
                addr: remote_addr.to_string(),
                reason: format!("localapi returned {status}: {}", String::from_utf8_lossy(&body)),
            });
        }
        let who: WhoIsResponse = serde_json::from_slice(&body).map_err(|err| {
            OverlayError::WhoIs {
                addr: remote_addr.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Identity {
            login_name: who.user_profile.login_name,
            computed_name: who.node.computed_name,
            remote_addr: remote_addr.to_string(),
        })
    }
}
