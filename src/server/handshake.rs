//! Handshake-stage routing, origin enforcement, and header filtering
//!
//! The URL path fixes two per-connection tags before any frame is exchanged:
//! how errors are rendered and which query dialect the planner sees. Origin
//! enforcement and header filtering also happen here, before the upgrade —
//! a rejected handshake never opens a socket.

use crate::config::CorsPolicy;
use crate::core::error::HandshakeError;
use axum::http::header::{CONNECTION, COOKIE, ORIGIN, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

pub use crate::core::request::QueryKind;

/// How operation errors are rendered on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStyle {
    /// A single bare error object
    Legacy,
    /// `{"errors": [...]}` per the GraphQL spec
    Compliant,
}

/// Map a request path to its `(error style, query kind)` pair
///
/// The one place the path → tags mapping lives; the router consults it for
/// every upgrade request. Unknown paths are rejected with 404 before the
/// upgrade.
pub fn route_path(path: &str) -> Option<(ErrorStyle, QueryKind)> {
    match path {
        "/v1alpha1/graphql" => Some((ErrorStyle::Legacy, QueryKind::Standard)),
        "/v1/graphql" => Some((ErrorStyle::Compliant, QueryKind::Standard)),
        "/v1beta1/relay" => Some((ErrorStyle::Compliant, QueryKind::Relay)),
        _ => None,
    }
}

/// The subprotocol advertised back to the client
pub const SUBPROTOCOL: &str = "graphql-ws";

/// Enforce the configured origin policy against the request headers
pub fn enforce_origin(policy: &CorsPolicy, headers: &HeaderMap) -> Result<(), HandshakeError> {
    let CorsPolicy::AllowedOrigins { .. } = policy else {
        return Ok(());
    };

    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::MissingOrigin)?;

    if policy.origin_allowed(origin) {
        Ok(())
    } else {
        Err(HandshakeError::AccessDenied {
            origin: origin.to_string(),
        })
    }
}

/// Build the header set retained for authentication and upstream forwarding
///
/// Hop-by-hop and upgrade-only headers are stripped; under
/// `Disabled { read_cookie: false }` the `Cookie` header is dropped too, with
/// a one-line note in the log.
pub fn retained_headers(policy: &CorsPolicy, headers: &HeaderMap) -> HeaderMap {
    let mut retained = headers.clone();
    retained.remove(SEC_WEBSOCKET_KEY);
    retained.remove(SEC_WEBSOCKET_VERSION);
    retained.remove(UPGRADE);
    retained.remove(CONNECTION);

    if let CorsPolicy::Disabled { read_cookie: false } = policy
        && retained.remove(COOKIE).is_some()
    {
        tracing::info!("cookie is not read when CORS is disabled, and WebSocket requests cannot be validated");
    }

    retained
}

/// Merge `connection_init` payload headers over the retained handshake set
///
/// Payload entries win on duplicates. Entries that are not valid header
/// names/values are skipped rather than failing the whole init.
pub fn merge_init_headers(retained: &HeaderMap, payload: &HashMap<String, String>) -> HeaderMap {
    let mut merged = retained.clone();
    for (name, value) in payload {
        let Ok(name) = HeaderName::try_from(name.as_str()) else {
            continue;
        };
        let Ok(value) = HeaderValue::try_from(value.as_str()) else {
            continue;
        };
        merged.insert(name, value);
    }
    merged
}
