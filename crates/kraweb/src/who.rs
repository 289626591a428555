//! Built-in `/who` endpoint: tells an overlay caller who the network says
//! they are.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::metrics::ServerMetrics;
use crate::overlay::OverlayClient;

#[derive(Clone)]
pub struct WhoState {
    pub overlay: Arc<dyn OverlayClient>,
    pub metrics: ServerMetrics,
}

/// Resolves the caller's identity from the connection's remote address.
/// On lookup failure the caller gets a 500 carrying the lookup error text;
/// the server itself is unaffected.
pub async fn who_handler(
    State(state): State<WhoState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    match state.overlay.whois(&addr.to_string()).await {
        Ok(who) => {
            state.metrics.observe_whois(true);
            let page = format!(
                "<html><body><h1>Hello, world!</h1>\n\
                 <p>You are <b>{}</b> from <b>{}</b> ({addr})</p></body></html>",
                escape_html(&who.login_name),
                escape_html(who.device_label()),
            );
            Html(page).into_response()
        }
        Err(err) => {
            state.metrics.observe_whois(false);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Escapes the five characters significant to HTML, so untrusted identity
/// strings cannot inject markup.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::mock::MockOverlay;
    use crate::overlay::Identity;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn who_router(overlay: MockOverlay) -> Router {
        Router::new()
            .route("/who", get(who_handler))
            .with_state(WhoState {
                overlay: Arc::new(overlay),
                metrics: ServerMetrics::new(),
            })
    }

    async fn get_who(router: Router, addr: &str) -> (StatusCode, String) {
        let mut req = Request::builder()
            .uri("/who")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn successful_lookup_renders_login_and_device_label() {
        let overlay = MockOverlay::new().with_whois(
            "100.64.0.7:51442",
            Identity {
                login_name: "ada@example.com".to_string(),
                computed_name: "adas-laptop.tail1234.ts.net".to_string(),
                remote_addr: "100.64.0.7:51442".to_string(),
            },
        );

        let (status, body) = get_who(who_router(overlay), "100.64.0.7:51442").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ada@example.com"));
        assert!(body.contains("<b>adas-laptop</b>"));
        assert!(body.contains("100.64.0.7:51442"));
    }

    #[tokio::test]
    async fn identity_strings_are_escaped() {
        let overlay = MockOverlay::new().with_whois(
            "100.64.0.8:1000",
            Identity {
                login_name: "eve<script>@example.com".to_string(),
                computed_name: "<evil>.ts.net".to_string(),
                remote_addr: "100.64.0.8:1000".to_string(),
            },
        );

        let (status, body) = get_who(who_router(overlay), "100.64.0.8:1000").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("eve&lt;script&gt;@example.com"));
        assert!(body.contains("&lt;evil&gt;"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn failed_lookup_returns_500_with_error_text() {
        let overlay =
            MockOverlay::new().with_whois_error("100.64.0.9:2000", "no such peer in netmap");

        let (status, body) = get_who(who_router(overlay), "100.64.0.9:2000").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("no such peer in netmap"));
    }

    #[test]
    fn escape_matches_html_escaper() {
        assert_eq!(
            escape_html(r#"<b>&"it's"</b>"#),
            "&lt;b&gt;&amp;&#34;it&#39;s&#34;&lt;/b&gt;"
        );
    }
}
