//! Server configuration
//!
//! Built once at startup and passed by reference from there on; no
//! component reads ambient global state.

use std::path::PathBuf;

use crate::error::Error;

/// Hostname used when the operator does not pick one.
pub const DEFAULT_HOSTNAME: &str = "hugin";

/// Default loopback port for the public table.
pub const DEFAULT_LOCAL_PORT: u16 = 56664;

/// Immutable server configuration.
#[derive(Debug, Clone)]
pub struct KrawebConfig {
    /// Name under which the node joins the overlay network. Must be
    /// non-empty in production mode.
    pub hostname: String,

    /// File containing the overlay join secret; trailing newline trimmed.
    pub auth_key_path: Option<PathBuf>,

    /// Overlay coordination endpoint. Empty selects the upstream default.
    pub control_url: String,

    /// Route overlay-network diagnostics into the process log.
    pub verbose: bool,

    /// If non-empty, serve everything on this single plaintext address and
    /// never touch the overlay network.
    pub dev: String,

    /// Loopback bind address and port for the public table.
    pub local_addr: String,
    pub local_port: u16,
}

impl Default for KrawebConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            auth_key_path: None,
            control_url: String::new(),
            verbose: false,
            dev: String::new(),
            local_addr: "127.0.0.1".to_string(),
            local_port: DEFAULT_LOCAL_PORT,
        }
    }
}

impl KrawebConfig {
    pub fn dev_mode(&self) -> bool {
        !self.dev.is_empty()
    }

    /// Startup validation. Runs before any network activity.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.dev_mode() && self.hostname.is_empty() {
            return Err(Error::Config(
                "hostname, if specified, cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The hostname used for links and identity displays. In dev mode with
    /// the default hostname this is rewritten to `<host>:<port>` of the dev
    /// address (host defaulting to `localhost`) so pages render sensibly.
    /// Purely cosmetic, never a transport decision.
    pub fn effective_hostname(&self) -> String {
        if self.dev_mode() && self.hostname == DEFAULT_HOSTNAME {
            if let Some((host, port)) = split_host_port(&self.dev) {
                let host = if host.is_empty() { "localhost" } else { host };
                return format!("{host}:{port}");
            }
        }
        self.hostname.clone()
    }

    /// The socket address the dev listener actually binds. A host-omitted
    /// form like `:8080` means all interfaces, so the empty host becomes
    /// `0.0.0.0` here; [`Self::effective_hostname`] keeps its cosmetic
    /// `localhost` rewrite for links.
    pub fn dev_bind_addr(&self) -> String {
        if let Some((host, port)) = split_host_port(&self.dev) {
            if host.is_empty() {
                return format!("0.0.0.0:{port}");
            }
        }
        self.dev.clone()
    }

    /// Reads the auth key file, trimming a trailing newline. An unreadable
    /// file is a configuration error, reported before the join is attempted.
    pub fn load_auth_key(&self) -> Result<Option<String>, Error> {
        let Some(path) = &self.auth_key_path else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("unreadable auth key file {}: {err}", path.display()))
        })?;
        let key = raw.strip_suffix('\n').unwrap_or(&raw).to_string();
        Ok(Some(key))
    }
}

fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    let (host, port) = addr.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_hostname_rejected_in_production() {
        let cfg = KrawebConfig {
            hostname: String::new(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_hostname_allowed_in_dev_mode() {
        let cfg = KrawebConfig {
            hostname: String::new(),
            dev: ":8080".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dev_mode_rewrites_default_hostname() {
        let cfg = KrawebConfig {
            dev: ":8080".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.effective_hostname(), "localhost:8080");

        let cfg = KrawebConfig {
            dev: "0.0.0.0:9090".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.effective_hostname(), "0.0.0.0:9090");

        let cfg = KrawebConfig {
            dev: "[::1]:8443".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.effective_hostname(), "::1:8443");
    }

    #[test]
    fn dev_bind_addr_fills_in_omitted_host() {
        let cfg = KrawebConfig {
            dev: ":8080".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.dev_bind_addr(), "0.0.0.0:8080");

        let cfg = KrawebConfig {
            dev: "127.0.0.1:8080".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.dev_bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn dev_mode_keeps_explicit_hostname() {
        let cfg = KrawebConfig {
            hostname: "gallery".to_string(),
            dev: ":8080".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.effective_hostname(), "gallery");
    }

    #[test]
    fn production_hostname_untouched() {
        let cfg = KrawebConfig::default();
        assert_eq!(cfg.effective_hostname(), DEFAULT_HOSTNAME);
    }

    #[test]
    fn auth_key_trailing_newline_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tskey-auth-abc123").unwrap();

        let cfg = KrawebConfig {
            auth_key_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(cfg.load_auth_key().unwrap().as_deref(), Some("tskey-auth-abc123"));
    }

    #[test]
    fn unreadable_auth_key_is_config_error() {
        let cfg = KrawebConfig {
            auth_key_path: Some(PathBuf::from("/nonexistent/tskey")),
            ..Default::default()
        };
        assert!(matches!(cfg.load_auth_key(), Err(Error::Config(_))));
    }
}
