// Optional HTTP Basic auth gating `/api/*` (spec §6). Implemented as an
// axum middleware rather than `tower_http::validate_request`'s single-user
// `ValidateRequestHeaderLayer::basic`, since the configuration file allows
// an arbitrary `basic_auth_users` map; `tower-http` remains in use elsewhere
// for its tracing layer.

use crate::http::server::AppState;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;

pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !state.basic_auth_enabled {
        return next.run(request).await;
    }

    match check_credentials(&state, &request) {
        Ok(()) => next.run(request).await,
        Err(()) => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"fireactions\"")],
        )
            .into_response(),
    }
}

fn check_credentials(state: &AppState, request: &Request<axum::body::Body>) -> Result<(), ()> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(())?;

    let encoded = header_value.strip_prefix("Basic ").ok_or(())?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ())?;
    let decoded = String::from_utf8(decoded).map_err(|_| ())?;
    let (username, password) = decoded.split_once(':').ok_or(())?;

    match state.basic_auth_users.get(username) {
        Some(expected) if expected == password => Ok(()),
        _ => Err(()),
    }
}
