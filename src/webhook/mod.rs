// Event Router.
//
// Implements spec §4.6: verifies the inbound webhook signature, then routes
// `workflow_job` "queued" events to the fleet. Signature verification is
// grounded on terraphim's `webhook/signature.rs` (HMAC-SHA256 over the raw
// body, `X-Hub-Signature-256` header), upgraded from its hex-string compare
// to `Mac::verify_slice`'s constant-time comparison — same primitive, same
// crate, opposite direction from `webhooks/delivery.rs`'s outbound delivery
// signing.

use crate::error::Error;
use crate::fleet::PoolManager;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct WorkflowJobEvent {
    action: String,
    workflow_job: WorkflowJob,
}

#[derive(Debug, Deserialize)]
struct WorkflowJob {
    #[serde(default)]
    labels: Vec<String>,
}

/// Verifies `signature` (the raw `X-Hub-Signature-256` header value,
/// including the `sha256=` prefix) against `body` using `secret`.
pub fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> Result<(), Error> {
    let hex_digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(hex_digest).map_err(|_| Error::WebhookVerifyFailed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(anyhow::Error::new(e)))?;
    mac.update(body);

    mac.verify_slice(&expected).map_err(|_| Error::WebhookVerifyFailed)
}

/// Parses the raw body as a `workflow_job` event and, if its action is
/// `"queued"`, routes it to the first label-matching pool. Any other action
/// (`in_progress`, `completed`, ...) is silently acknowledged, same as spec
/// §4.6's "no match" case.
pub async fn handle_event(fleet: &Arc<dyn PoolManager>, body: &[u8]) -> Result<(), Error> {
    let event: WorkflowJobEvent =
        serde_json::from_slice(body).map_err(|e| Error::Internal(anyhow::Error::new(e)))?;

    if event.action != "queued" {
        debug!(action = %event.action, "ignoring non-queued workflow_job event");
        return Ok(());
    }

    fleet.route_job_queued(&event.workflow_job.labels).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = b"{\"action\":\"queued\"}";
        let signature = sign("s3cr3t", body);
        assert!(verify_signature("s3cr3t", &signature, body).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = b"{\"action\":\"queued\"}";
        let signature = sign("s3cr3t", body);
        assert!(matches!(
            verify_signature("wrong", &signature, body),
            Err(Error::WebhookVerifyFailed)
        ));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign("s3cr3t", b"original");
        assert!(matches!(
            verify_signature("s3cr3t", &signature, b"tampered"),
            Err(Error::WebhookVerifyFailed)
        ));
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(matches!(
            verify_signature("s3cr3t", "sha256=not-hex", b"body"),
            Err(Error::WebhookVerifyFailed)
        ));
    }

    struct RoutingSpy(tokio::sync::Mutex<Vec<Vec<String>>>);

    #[async_trait::async_trait]
    impl PoolManager for RoutingSpy {
        async fn list_pools(&self) -> Vec<crate::types::PoolStatus> {
            vec![]
        }
        async fn get_pool(&self, _name: &str) -> Result<crate::types::PoolStatus, Error> {
            Err(Error::PoolNotFound)
        }
        async fn scale_pool(&self, _name: &str, _delta: i64) -> Result<(), Error> {
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
        async fn route_job_queued(&self, event_labels: &[String]) -> Result<(), Error> {
            self.0.lock().await.push(event_labels.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn queued_action_is_routed() {
        let spy: Arc<dyn PoolManager> = Arc::new(RoutingSpy(tokio::sync::Mutex::new(Vec::new())));
        let body = br#"{"action":"queued","workflow_job":{"labels":["linux","x64"]}}"#;
        handle_event(&spy, body).await.unwrap();
    }

    #[tokio::test]
    async fn non_queued_action_is_ignored() {
        let spy = Arc::new(RoutingSpy(tokio::sync::Mutex::new(Vec::new())));
        let fleet: Arc<dyn PoolManager> = spy.clone();
        let body = br#"{"action":"completed","workflow_job":{"labels":[]}}"#;
        handle_event(&fleet, body).await.unwrap();
        assert!(spy.0.lock().await.is_empty());
    }
}
