//! Outbound HTTP capability shared by the credential broker and the reverse
//! proxy. Handlers only see [`UpstreamClient`]; the production implementation
//! wraps a pooled `reqwest::Client` with an explicit per-call timeout.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request timed out: {message}")]
    Timeout { message: String },
    #[error("unable to reach upstream: {message}")]
    Unreachable { message: String },
    #[error("failed to build upstream client: {message}")]
    Client { message: String },
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestUpstreamClient {
    http: reqwest::Client,
}

impl ReqwestUpstreamClient {
    pub fn from_config(config: &Config) -> Result<Self, UpstreamError> {
        Self::with_timeout(Duration::from_millis(config.upstream_timeout_ms))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| UpstreamError::Client {
                message: error.to_string(),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify_error)?;
        let status = response.status();
        let body = response.text().await.map_err(classify_error)?;

        Ok(UpstreamResponse { status, body })
    }
}

fn classify_error(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout {
            message: error.to_string(),
        }
    } else {
        UpstreamError::Unreachable {
            message: error.to_string(),
        }
    }
}
