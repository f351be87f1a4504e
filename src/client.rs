// Thin HTTP client for the `pools`/`reload` CLI subcommands.
//
// Grounded on `original_source/commands/*.go`: the CLI never talks to the
// Fleet in-process, it drives the control interface over HTTP with the
// same `--endpoint`/`--username`/`--password` flags the Go client takes.

use crate::types::{ErrorBody, PoolStatus};
use anyhow::{anyhow, Result};
use reqwest::Client;

pub struct ApiClient {
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(endpoint: String, username: Option<String>, password: Option<String>) -> Self {
        Self {
            endpoint,
            username,
            password,
            http: Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.endpoint.trim_end_matches('/'), path);
        let mut req = self.http.request(method, url);
        if let Some(username) = &self.username {
            req = req.basic_auth(username, self.password.clone());
        }
        req
    }

    async fn send_expect_ok(&self, method: reqwest::Method, path: &str) -> Result<()> {
        let response = self.request(method, path).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        let body: ErrorBody = response
            .json()
            .await
            .unwrap_or_else(|_| ErrorBody::new("request failed"));
        Err(anyhow!(body.error))
    }

    pub async fn list_pools(&self) -> Result<Vec<PoolStatus>> {
        let response = self.request(reqwest::Method::GET, "/api/v1/pools").send().await?;
        Ok(response.json().await?)
    }

    pub async fn get_pool(&self, name: &str) -> Result<PoolStatus> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/v1/pools/{}", name))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("pool \"{}\" not found", name));
        }
        Ok(response.json().await?)
    }

    pub async fn scale_pool(&self, name: &str) -> Result<()> {
        self.send_expect_ok(reqwest::Method::POST, &format!("/api/v1/pools/{}/scale", name))
            .await
    }

    pub async fn pause_pool(&self, name: &str) -> Result<()> {
        self.send_expect_ok(reqwest::Method::POST, &format!("/api/v1/pools/{}/pause", name))
            .await
    }

    pub async fn resume_pool(&self, name: &str) -> Result<()> {
        self.send_expect_ok(reqwest::Method::POST, &format!("/api/v1/pools/{}/resume", name))
            .await
    }

    pub async fn reload(&self) -> Result<()> {
        self.send_expect_ok(reqwest::Method::POST, "/api/v1/restart").await
    }
}
