// Control Interface.
//
// Grounded on `metrics_server.rs`'s `axum::Router` / `TcpListener::bind` /
// `axum::serve` pattern, generalized from two routes to the full route table
// spec §4.7/§6 describes, with optional HTTP
// Basic auth gating `/api/*` (see `auth::require_basic_auth` for why this is
// a custom middleware rather than `tower_http::validate_request`).

mod auth;
mod handlers;
pub mod server;

pub use server::{router, serve, AppState};
