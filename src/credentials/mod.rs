// Credential Issuer Client.
//
// Contract per spec §4.2, supplemented from `original_source/helper/github`
// (the Go server authenticates as a GitHub App via `ghinstallation`, which
// internally signs a JWT assertion and exchanges it for an installation
// token). `ghinstallation` has no Rust equivalent in the pack, so the JWT
// assertion is built directly with `jsonwebtoken` (already depended on by
// `terraphim_github_runner/Cargo.toml`) and the installation/JIT-config
// exchange is a plain `reqwest` client, the way
// `terraphim_github_runner/src/registration.rs` talks to the Actions API.

use crate::error::Error;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const JWT_EXPIRY_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct JitConfigResponse {
    encoded_jit_config: String,
}

/// One-shot boot token minted for a named runner.
#[derive(Debug, Clone)]
pub struct BootToken(pub String);

/// Narrow capability surface for JIT credential issuance. Production
/// implementation talks to the GitHub Actions API; tests substitute a
/// double, matching spec §9's "interface-typed capability" redesign hint.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue_jit_config(
        &self,
        organization: &str,
        runner_name: &str,
        group_id: i64,
        labels: &[String],
    ) -> Result<BootToken, Error>;
}

pub struct GithubCredentialIssuer {
    app_id: i64,
    app_private_key: String,
    client: reqwest::Client,
    api_base: String,
}

impl GithubCredentialIssuer {
    pub fn new(app_id: i64, app_private_key: String) -> Self {
        Self {
            app_id,
            app_private_key,
            client: reqwest::Client::new(),
            api_base: "https://api.github.com".to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(app_id: i64, app_private_key: String, api_base: String) -> Self {
        Self {
            api_base,
            ..Self::new(app_id, app_private_key)
        }
    }

    fn app_jwt(&self) -> Result<String, Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::CredentialIssueFailed(anyhow::Error::new(e)))?
            .as_secs();

        let claims = AppClaims {
            iat: now.saturating_sub(60),
            exp: now + JWT_EXPIRY_SECS,
            iss: self.app_id.to_string(),
        };

        let key = EncodingKey::from_rsa_pem(self.app_private_key.as_bytes())
            .map_err(|e| Error::CredentialIssueFailed(anyhow::Error::new(e)))?;

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| Error::CredentialIssueFailed(anyhow::Error::new(e)))
    }

    async fn installation_id(&self, organization: &str, jwt: &str) -> Result<i64, Error> {
        let url = format!("{}/orgs/{}/installation", self.api_base, organization);
        let response = self
            .client
            .get(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "fireactions")
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(anyhow::Error::new(e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::CredentialUnavailable {
                organization: organization.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(anyhow::anyhow!(
                "installation lookup returned {}",
                response.status()
            )));
        }

        let body: InstallationResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(anyhow::Error::new(e)))?;
        Ok(body.id)
    }

    async fn installation_token(&self, installation_id: i64, jwt: &str) -> Result<String, Error> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "fireactions")
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(anyhow::Error::new(e)))?;

        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(anyhow::anyhow!(
                "installation token exchange returned {}",
                response.status()
            )));
        }

        let body: InstallationTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(anyhow::Error::new(e)))?;
        Ok(body.token)
    }
}

#[async_trait]
impl CredentialIssuer for GithubCredentialIssuer {
    async fn issue_jit_config(
        &self,
        organization: &str,
        runner_name: &str,
        group_id: i64,
        labels: &[String],
    ) -> Result<BootToken, Error> {
        let jwt = self.app_jwt()?;
        let installation_id = self.installation_id(organization, &jwt).await?;
        let installation_token = self.installation_token(installation_id, &jwt).await?;

        let url = format!(
            "{}/orgs/{}/actions/runners/generate-jitconfig",
            self.api_base, organization
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&installation_token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "fireactions")
            .json(&serde_json::json!({
                "name": runner_name,
                "runner_group_id": group_id,
                "labels": labels,
            }))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(anyhow::Error::new(e)))?;

        if !response.status().is_success() {
            return Err(Error::CredentialIssueFailed(anyhow::anyhow!(
                "jit config mint returned {}",
                response.status()
            )));
        }

        let body: JitConfigResponse = response
            .json()
            .await
            .map_err(|e| Error::CredentialIssueFailed(anyhow::Error::new(e)))?;

        Ok(BootToken(body.encoded_jit_config))
    }
}
