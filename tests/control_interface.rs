// HTTP-level scenarios from spec §8 against the real axum router, driven
// in-process via `tower::ServiceExt::oneshot` (no socket bind).

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use fireactions::error::Error;
use fireactions::fleet::PoolManager;
use fireactions::http::{router, AppState};
use fireactions::types::{PoolState, PoolStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

/// `PoolManager` double driving the router tests: one named pool at a
/// configurable size, plus a count of scale calls received.
struct FakeFleet {
    pool: tokio::sync::Mutex<PoolStatus>,
    scale_calls: std::sync::atomic::AtomicU32,
}

impl FakeFleet {
    fn new(status: PoolStatus) -> Self {
        Self {
            pool: tokio::sync::Mutex::new(status),
            scale_calls: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PoolManager for FakeFleet {
    async fn list_pools(&self) -> Vec<PoolStatus> {
        vec![self.pool.lock().await.clone()]
    }

    async fn get_pool(&self, name: &str) -> Result<PoolStatus, Error> {
        let pool = self.pool.lock().await;
        if pool.name == name {
            Ok(pool.clone())
        } else {
            Err(Error::PoolNotFound)
        }
    }

    async fn scale_pool(&self, name: &str, _delta: i64) -> Result<(), Error> {
        self.scale_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut pool = self.pool.lock().await;
        if pool.name != name {
            return Err(Error::PoolNotFound);
        }
        if pool.cur_runners < pool.max_runners as usize {
            pool.cur_runners += 1;
        }
        Ok(())
    }

    async fn pause_pool(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn resume_pool(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn reload(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn route_job_queued(&self, _event_labels: &[String]) -> Result<(), Error> {
        Ok(())
    }
}

fn app(fleet: Arc<dyn PoolManager>) -> axum::Router {
    router(AppState {
        fleet,
        webhook_secret: Arc::from("s3cr3t"),
        basic_auth_enabled: false,
        basic_auth_users: Arc::new(HashMap::new()),
    })
}

fn pool_status(name: &str, cur: usize, max: u32) -> PoolStatus {
    PoolStatus {
        name: name.to_string(),
        state: PoolState::Active,
        cur_runners: cur,
        min_runners: 0,
        max_runners: max,
        runners: vec![],
    }
}

/// Scenario 4: scale is clamped at max_runners, observed through the HTTP API.
#[tokio::test]
async fn scale_above_max_is_clamped_via_http() {
    let fleet: Arc<dyn PoolManager> = Arc::new(FakeFleet::new(pool_status("p", 3, 3)));
    let app = app(fleet.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/pools/p/scale")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let status = fleet.get_pool("p").await.unwrap();
    assert_eq!(status.cur_runners, 3);
}

/// Scenario 6: unknown pool returns 404 with the documented error body.
#[tokio::test]
async fn unknown_pool_returns_404() {
    let fleet: Arc<dyn PoolManager> = Arc::new(FakeFleet::new(pool_status("p", 1, 3)));
    let app = app(fleet);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/pools/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "pool not found");
}

#[tokio::test]
async fn healthz_is_unauthenticated_even_with_basic_auth_enabled() {
    let fleet: Arc<dyn PoolManager> = Arc::new(FakeFleet::new(pool_status("p", 1, 3)));
    let mut users = HashMap::new();
    users.insert("admin".to_string(), "hunter2".to_string());

    let app = router(AppState {
        fleet,
        webhook_secret: Arc::from("s3cr3t"),
        basic_auth_enabled: true,
        basic_auth_users: Arc::new(users),
    });

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_routes_reject_missing_credentials_when_basic_auth_enabled() {
    let fleet: Arc<dyn PoolManager> = Arc::new(FakeFleet::new(pool_status("p", 1, 3)));
    let mut users = HashMap::new();
    users.insert("admin".to_string(), "hunter2".to_string());

    let app = router(AppState {
        fleet,
        webhook_secret: Arc::from("s3cr3t"),
        basic_auth_enabled: true,
        basic_auth_users: Arc::new(users),
    });

    let response = app
        .oneshot(Request::builder().uri("/api/v1/pools").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_rejects_unsigned_payload() {
    let fleet: Arc<dyn PoolManager> = Arc::new(FakeFleet::new(pool_status("p", 1, 3)));
    let app = app(fleet);

    let body = br#"{"action":"queued","workflow_job":{"labels":["linux"]}}"#;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .body(Body::from(body.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
