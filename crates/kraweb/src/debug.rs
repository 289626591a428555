//! Overlay-only `/debug/` page: version, effective hostname, uptime, and
//! the registered route patterns.

use std::time::Instant;

use axum::extract::State;
use axum::response::Html;

#[derive(Clone)]
pub struct DebugInfo {
    pub hostname: String,
    pub started: Instant,
    pub routes: Vec<String>,
}

pub(crate) async fn debug_handler(State(info): State<DebugInfo>) -> Html<String> {
    let mut page = String::new();
    page.push_str("<html><body><h1>kraweb debug</h1>\n<ul>\n");
    page.push_str(&format!(
        "<li>version: {}</li>\n",
        env!("CARGO_PKG_VERSION")
    ));
    page.push_str(&format!("<li>hostname: {}</li>\n", info.hostname));
    page.push_str(&format!(
        "<li>uptime: {}s</li>\n",
        info.started.elapsed().as_secs()
    ));
    page.push_str("</ul>\n<h2>routes</h2>\n<ul>\n");
    for route in &info.routes {
        page.push_str(&format!("<li><code>{route}</code></li>\n"));
    }
    page.push_str("</ul></body></html>\n");
    Html(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn page_lists_routes_and_hostname() {
        let info = DebugInfo {
            hostname: "hugin".to_string(),
            started: Instant::now(),
            routes: vec!["/album/".to_string(), "/who".to_string()],
        };

        let Html(page) = debug_handler(State(info)).await;
        assert!(page.contains("hugin"));
        assert!(page.contains("<code>/album/</code>"));
        assert!(page.contains("<code>/who</code>"));
    }
}
