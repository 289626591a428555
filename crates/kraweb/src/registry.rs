//! Handler registration and routing-table construction.
//!
//! Patterns follow the prefix conventions of a classic HTTP mux: a pattern
//! ending in `/` claims the whole subtree below it (prefix stripped before
//! dispatch), `/` itself is the catch-all, and anything else matches
//! exactly. Registration is last-write-wins; there is no duplicate error.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use tower::util::BoxCloneService;
use tower::Service;

/// Uniform boxed handler type stored per pattern.
pub type HandlerService = BoxCloneService<Request<Body>, Response, Infallible>;

/// Where a handler is reachable from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// On every listener.
    Public,
    /// Only through the overlay network.
    OverlayOnly,
}

struct HandlerEntry {
    service: HandlerService,
    visibility: Visibility,
}

/// Mapping from URL pattern to handler, each tagged with a [`Visibility`].
/// Populated during startup wiring, then turned into routing tables exactly
/// once; there is no runtime route mutation.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: BTreeMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or replaces the entry for `pattern`.
    pub fn register<S>(&mut self, pattern: &str, service: S, visibility: Visibility)
    where
        S: Service<Request<Body>, Response = Response, Error = Infallible>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        self.entries.insert(
            pattern.to_string(),
            HandlerEntry {
                service: BoxCloneService::new(service),
                visibility,
            },
        );
    }

    /// Registered patterns, in order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds both routing views: the public table holds only `Public`
    /// entries, the overlay table holds every entry. Pure; called once
    /// before any listener starts.
    pub fn build_tables(&self) -> (Router, Router) {
        let mut public = Router::new();
        let mut overlay = Router::new();
        for (pattern, entry) in &self.entries {
            if entry.visibility == Visibility::Public {
                public = mount(public, pattern, entry.service.clone());
            }
            overlay = mount(overlay, pattern, entry.service.clone());
        }
        (public, overlay)
    }
}

fn mount(router: Router, pattern: &str, service: HandlerService) -> Router {
    if pattern == "/" {
        router.fallback_service(service)
    } else if let Some(prefix) = pattern.strip_suffix('/') {
        router.nest_service(prefix, service)
    } else {
        router.route_service(pattern, service)
    }
}
