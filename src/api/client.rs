use crate::identity::Identity;
use crate::resilience::{parse_retry_after, RequestError, RetryPolicy};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_SIZE: usize = 5 * 1024 * 1024; // 5MB

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Unsupported URL scheme '{0}': http or https required")]
    UnsupportedScheme(String),
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// JSON-over-HTTP client for the news API.
///
/// Every call gets a 30s deadline. Transient failures (no response, timeout,
/// 429, 5xx) are retried according to the [`RetryPolicy`]; anything else is
/// returned on the first attempt.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    policy: RetryPolicy,
    token: Option<Identity>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        policy: RetryPolicy,
        token: Option<Identity>,
    ) -> Result<Self, ApiClientError> {
        let base =
            Url::parse(base_url).map_err(|e| ApiClientError::InvalidBaseUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiClientError::UnsupportedScheme(base.scheme().to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("newswire/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base,
            policy,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// GET `path` (resolved against the base URL) and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        let bytes = self.send_with_retry(Method::GET, path, None).await?;
        decode(&bytes)
    }

    /// POST `body` as JSON to `path` and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(body).map_err(|e| RequestError::Protocol(e.to_string()))?;
        let bytes = self
            .send_with_retry(Method::POST, path, Some(payload))
            .await?;
        decode(&bytes)
    }

    async fn send_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, RequestError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| RequestError::Protocol(format!("invalid request path '{}': {}", path, e)))?;
        let mut attempt: u32 = 0;

        loop {
            match self.send_once(method.clone(), &url, body.clone()).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    let decision = self.policy.decide(&err, attempt);
                    attempt += 1;
                    if !decision.retryable || attempt >= self.policy.max_attempts {
                        tracing::debug!(
                            error = %err,
                            attempts = attempt,
                            url = %url,
                            "Request failed"
                        );
                        return Err(err);
                    }
                    tracing::warn!(
                        error = %err,
                        attempt,
                        delay_ms = decision.delay.as_millis() as u64,
                        url = %url,
                        "Retrying request after transient error"
                    );
                    tokio::time::sleep(decision.delay).await;
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, RequestError> {
        let mut request = self
            .http
            .request(method, url.clone())
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose()));
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| RequestError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response.headers().get(RETRY_AFTER).and_then(parse_retry_after);
            return Err(RequestError::from_status(status.as_u16(), retry_after));
        }

        read_limited(response, MAX_BODY_SIZE).await
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RequestError> {
    serde_json::from_slice(bytes).map_err(|e| RequestError::Protocol(e.to_string()))
}

async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, RequestError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RequestError::Protocol(format!(
                "response exceeds {} bytes",
                limit
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RequestError::Protocol(format!(
                "response exceeds {} bytes",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
