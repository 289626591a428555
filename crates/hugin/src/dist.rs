//! Embedded front-end bundle, compiled into the binary so the server ships
//! as a single file.

use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};

static INDEX_HTML: &str = include_str!("../dist/index.html");
static APP_JS: &str = include_str!("../dist/app.js");
static STYLE_CSS: &str = include_str!("../dist/style.css");

pub(crate) fn service() -> MethodRouter {
    get(dist_handler)
}

async fn dist_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };
    match lookup(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.to_string())],
                content,
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn lookup(path: &str) -> Option<&'static str> {
    match path {
        "index.html" => Some(INDEX_HTML),
        "app.js" => Some(APP_JS),
        "style.css" => Some(STYLE_CSS),
        _ => None,
    }
}
