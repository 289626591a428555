//! Album directory serving. The album is plain files on disk; dispatch
//! under `/album/` and `/content/` happens with the route prefix already
//! stripped.

use std::convert::Infallible;
use std::path::Path;

use axum::body::Body;
use axum::http::Request;
use kraweb::HandlerService;
use tower::{service_fn, ServiceExt};
use tower_http::services::ServeDir;

pub(crate) fn service(dir: &Path) -> HandlerService {
    let serve = ServeDir::new(dir);
    // The request type is pinned here; ServeDir itself serves any body type.
    HandlerService::new(service_fn(move |req: Request<Body>| {
        let serve = serve.clone();
        async move {
            let res = serve.oneshot(req).await?;
            Ok::<_, Infallible>(res.map(Body::new))
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use kraweb::{HandlerRegistry, Visibility};

    #[tokio::test]
    async fn files_served_under_both_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01.jpg"), b"jpeg bytes").unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("/album/", service(dir.path()), Visibility::Public);
        registry.register("/content/", service(dir.path()), Visibility::Public);
        let (public, _) = registry.build_tables();

        for path in ["/album/01.jpg", "/content/01.jpg"] {
            let req = Request::builder().uri(path).body(Body::empty()).unwrap();
            let resp = public.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{path}");
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&bytes[..], b"jpeg bytes");
        }

        let req = Request::builder()
            .uri("/album/missing.jpg")
            .body(Body::empty())
            .unwrap();
        let resp = public.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
