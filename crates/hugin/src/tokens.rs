//! Overlay-only `/tokens` endpoint: hands prefixed environment secrets to
//! the embedded front-end as JSON.

use std::collections::BTreeMap;

use axum::routing::{get, MethodRouter};
use axum::Json;

/// Environment variables with this prefix are exposed, prefix stripped and
/// the remainder lowercased: `HUGIN_TOKEN_FOO=bar` becomes `"foo": "bar"`.
pub(crate) const TOKEN_PREFIX: &str = "HUGIN_TOKEN_";

pub(crate) fn service() -> MethodRouter {
    get(tokens_handler)
}

async fn tokens_handler() -> Json<BTreeMap<String, String>> {
    Json(collect_tokens(std::env::vars()))
}

fn collect_tokens(vars: impl Iterator<Item = (String, String)>) -> BTreeMap<String, String> {
    vars.filter_map(|(name, value)| {
        name.strip_prefix(TOKEN_PREFIX)
            .map(|rest| (rest.to_ascii_lowercase(), value))
    })
    .collect()
}
