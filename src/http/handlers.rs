use crate::error::Error;
use crate::http::server::AppState;
use crate::types::{ErrorBody, VersionInfo};
use crate::webhook;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

fn error_response(error: Error) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::new(error.to_string()))).into_response()
}

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn version() -> impl IntoResponse {
    Json(VersionInfo::current())
}

pub async fn list_pools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fleet.list_pools().await)
}

pub async fn get_pool(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.fleet.get_pool(&id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn scale_pool(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.fleet.scale_pool(&id, 1).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn pause_pool(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.fleet.pause_pool(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn resume_pool(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.fleet.resume_pool(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn restart(State(state): State<AppState>) -> Response {
    match state.fleet.reload().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn webhook_github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let signature = match headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s,
        None => return error_response(Error::WebhookVerifyFailed),
    };

    if let Err(e) = webhook::verify_signature(&state.webhook_secret, signature, &body) {
        return error_response(e);
    }

    match webhook::handle_event(&state.fleet, &body).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}
