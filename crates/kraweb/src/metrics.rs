//! Operational metrics, exposed on the overlay-only `/metrics` endpoint in
//! prometheus text format.

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Request and identity-lookup counters shared by every listener.
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    requests: IntCounterVec,
    whois_lookups: IntCounter,
    whois_failures: IntCounter,
}

impl ServerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("kraweb_http_requests", "HTTP requests served, by listener surface"),
            &["surface"],
        )
        .unwrap();
        let whois_lookups =
            IntCounter::new("kraweb_whois_lookups", "Identity lookups attempted").unwrap();
        let whois_failures =
            IntCounter::new("kraweb_whois_failures", "Identity lookups that failed").unwrap();

        registry.register(Box::new(requests.clone())).unwrap();
        registry.register(Box::new(whois_lookups.clone())).unwrap();
        registry.register(Box::new(whois_failures.clone())).unwrap();

        Self {
            registry,
            requests,
            whois_lookups,
            whois_failures,
        }
    }

    pub fn observe_request(&self, surface: &str) {
        self.requests.with_label_values(&[surface]).inc();
    }

    pub fn observe_whois(&self, ok: bool) {
        self.whois_lookups.inc();
        if !ok {
            self.whois_failures.inc();
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buf) {
            warn!("failed to encode metrics: {err}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) async fn metrics_handler(State(metrics): State<ServerMetrics>) -> String {
    metrics.render()
}

/// Wraps a routing table so every request through it bumps the per-surface
/// counter.
pub(crate) fn track(router: Router, metrics: ServerMetrics, surface: &'static str) -> Router {
    router.layer(middleware::from_fn(move |req: Request, next: Next| {
        let metrics = metrics.clone();
        async move {
            metrics.observe_request(surface);
            next.run(req).await
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_counter_labels_by_surface() {
        let metrics = ServerMetrics::new();
        metrics.observe_request("local");
        metrics.observe_request("local");
        metrics.observe_request("overlay-http");

        let rendered = metrics.render();
        assert!(rendered.contains(r#"kraweb_http_requests{surface="local"} 2"#));
        assert!(rendered.contains(r#"kraweb_http_requests{surface="overlay-http"} 1"#));
    }

    #[test]
    fn whois_failures_tracked_separately() {
        let metrics = ServerMetrics::new();
        metrics.observe_whois(true);
        metrics.observe_whois(false);

        let rendered = metrics.render();
        assert!(rendered.contains("kraweb_whois_lookups 2"));
        assert!(rendered.contains("kraweb_whois_failures 1"));
    }
}
