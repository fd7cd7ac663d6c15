use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Registry;
use crate::mapper::ExternalPayload;

pub mod model;

pub use model::{ClientResult, SendMethod};

/// Outbound transport to the national registry.
///
/// Implementations never fail: every transport or HTTP problem is folded
/// into an unsuccessful [`ClientResult`].
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        payload: &ExternalPayload,
        method: SendMethod,
    ) -> ClientResult;
}

#[derive(Clone)]
pub struct HttpRegistryClient {
    http: Client,
    base_url: Url,
    api_key: String,
    university_id: String,
}

impl fmt::Debug for HttpRegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRegistryClient")
            .field("base_url", &self.base_url)
            .field("university_id", &self.university_id)
            .finish_non_exhaustive()
    }
}

impl HttpRegistryClient {
    pub fn new(
        base_url: Url,
        api_key: String,
        university_id: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pddikti-sync/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build registry HTTP client")?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            api_key,
            university_id,
        })
    }

    pub fn from_config(cfg: &Registry) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid registry base URL")?;
        Self::new(
            base_url,
            cfg.api_key.clone(),
            cfg.university_id.clone(),
            cfg.timeout(),
        )
    }

    pub fn build_request(
        &self,
        endpoint: &str,
        payload: &ExternalPayload,
        method: SendMethod,
    ) -> Result<reqwest::Request> {
        let url = self
            .base_url
            .join(endpoint.trim_start_matches('/'))
            .with_context(|| format!("invalid registry endpoint {}", endpoint))?;
        self.http
            .request(method.as_http(), url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-University-ID", &self.university_id)
            .header("Content-Type", "application/json")
            .json(payload)
            .build()
            .context("failed to build registry request")
    }

    async fn execute(&self, request: reqwest::Request) -> ClientResult {
        info!(method = %request.method(), url = %request.url(), "registry request");
        let res = match self.http.execute(request).await {
            Ok(res) => res,
            Err(err) => {
                warn!(error = %err, "registry unreachable");
                return ClientResult::transport_error(err.to_string());
            }
        };

        let status = res.status();
        let text = match res.text().await {
            Ok(text) => text,
            Err(err) => {
                warn!(status = status.as_u16(), error = %err, "failed to read registry response");
                return ClientResult::rejected(status.as_u16(), err.to_string());
            }
        };

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %text, "registry rejected payload");
            return ClientResult::rejected(status.as_u16(), text);
        }
        debug!(status = status.as_u16(), body = %text, "registry accepted payload");
        ClientResult::accepted(status.as_u16(), parse_body(&text))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn send(
        &self,
        endpoint: &str,
        payload: &ExternalPayload,
        method: SendMethod,
    ) -> ClientResult {
        match self.build_request(endpoint, payload, method) {
            Ok(request) => self.execute(request).await,
            Err(err) => ClientResult::transport_error(format!("{:#}", err)),
        }
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Structured response body; non-JSON text is kept verbatim.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
