//! Pass-through forwarding of `/api/v1/*` calls to the upstream API with the
//! caller's bearer token.
//!
//! By default the inbound body is not forwarded and the upstream status is not
//! propagated: the caller always gets `200` with the raw upstream text. Both
//! gaps close only when `full_passthrough` is enabled.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::config::Config;
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamRequest};

pub const API_PREFIX: &str = "/api/v1";
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub bearer_token: String,
    pub body: Option<Bytes>,
}

impl ProxyRequest {
    /// `raw_target` is the inbound path plus query string.
    pub fn new(
        method: Method,
        raw_target: &str,
        authorization: Option<&str>,
        body: Option<Bytes>,
    ) -> Self {
        Self {
            method,
            path: strip_api_prefix(raw_target).to_string(),
            bearer_token: bearer_token(authorization),
            body: body.filter(|bytes| !bytes.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid bearer token header: {message}")]
    InvalidToken { message: String },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[derive(Clone)]
pub struct ReverseProxy {
    upstream: Arc<dyn UpstreamClient>,
    base_url: String,
    full_passthrough: bool,
}

impl ReverseProxy {
    pub fn from_config(config: &Config, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            upstream,
            base_url: config.proxy_base_url.clone(),
            full_passthrough: config.proxy_full_passthrough,
        }
    }

    pub fn upstream_url(&self, request: &ProxyRequest) -> String {
        format!("{}{}", self.base_url, request.path)
    }

    pub async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let url = self.upstream_url(&request);

        tracing::info!(
            target: "phone_gateway.proxy",
            method = %request.method,
            path = %request.path,
            has_token = !request.bearer_token.is_empty(),
            "proxying request upstream",
        );

        let mut authorization = HeaderValue::from_str(&format!(
            "{BEARER_PREFIX}{}",
            request.bearer_token
        ))
        .map_err(|error| ProxyError::InvalidToken {
            message: error.to_string(),
        })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let body = if self.full_passthrough {
            request.body
        } else {
            None
        };

        let response = self
            .upstream
            .send(UpstreamRequest {
                method: request.method,
                url,
                headers,
                body,
            })
            .await
            .inspect_err(|error| {
                tracing::warn!(
                    target: "phone_gateway.proxy",
                    path = %request.path,
                    error = %error,
                    "proxied upstream call failed",
                );
            })?;

        let status = if self.full_passthrough {
            response.status
        } else {
            StatusCode::OK
        };

        Ok(ProxyResponse {
            status,
            body: response.body,
        })
    }
}

/// Removes one leading `/api/v1`; anything else is returned unchanged.
pub fn strip_api_prefix(raw_target: &str) -> &str {
    raw_target.strip_prefix(API_PREFIX).unwrap_or(raw_target)
}

pub fn bearer_token(authorization: Option<&str>) -> String {
    match authorization {
        Some(value) => value.strip_prefix(BEARER_PREFIX).unwrap_or(value).to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use axum::body::Bytes;
    use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{Method, StatusCode};

    use super::{ProxyError, ProxyRequest, ReverseProxy, bearer_token, strip_api_prefix};
    use crate::config::Config;
    use crate::upstream::UpstreamError;
    use crate::upstream::stub::StubUpstream;

    fn proxy_config(full_passthrough: bool) -> Result<Config> {
        let passthrough = if full_passthrough { "true" } else { "false" };
        let vars = [
            ("CTM_HOST", "ctm.test"),
            ("CTM_TOKEN", "tok"),
            ("CTM_SECRET", "sec"),
            ("CTM_ACCOUNT_ID", "1"),
            ("CTM_PROXY_FULL_PASSTHROUGH", passthrough),
        ];
        Ok(Config::from_lookup(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        })?)
    }

    #[test]
    fn prefix_is_stripped_exactly_once() {
        assert_eq!(strip_api_prefix("/api/v1/calls?x=1"), "/calls?x=1");
        assert_eq!(strip_api_prefix("/api/v1/api/v1/calls"), "/api/v1/calls");
        assert_eq!(strip_api_prefix("/api/v1"), "");
        assert_eq!(strip_api_prefix("/other/api/v1"), "/other/api/v1");
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc.def")), "abc.def");
        assert_eq!(bearer_token(Some("raw-token")), "raw-token");
        assert_eq!(bearer_token(Some("Bearer ")), "");
        assert_eq!(bearer_token(None), "");
    }

    #[tokio::test]
    async fn forwards_with_substituted_headers_and_documented_gaps() -> Result<()> {
        let stub = StubUpstream::responding(StatusCode::NOT_FOUND, r#"{"error":"missing"}"#);
        let proxy = ReverseProxy::from_config(&proxy_config(false)?, Arc::new(stub.clone()));

        let request = ProxyRequest::new(
            Method::PATCH,
            "/api/v1/calls/9?expand=1",
            Some("Bearer user-token"),
            Some(Bytes::from_static(br#"{"note":"hi"}"#)),
        );
        let response = proxy.forward(request).await?;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, r#"{"error":"missing"}"#);

        let recorded = stub.recorded().await;
        assert_eq!(recorded.len(), 1);
        let sent = &recorded[0];
        assert_eq!(sent.method, Method::PATCH);
        assert_eq!(sent.url, "https://ctm.test/api/v1/calls/9?expand=1");
        assert_eq!(
            sent.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
            Some("Bearer user-token")
        );
        assert_eq!(
            sent.headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
        assert_eq!(
            sent.headers.get(ACCEPT).and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
        assert!(sent.body.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn full_passthrough_forwards_body_and_status() -> Result<()> {
        let stub = StubUpstream::responding(StatusCode::UNPROCESSABLE_ENTITY, "{}");
        let proxy = ReverseProxy::from_config(&proxy_config(true)?, Arc::new(stub.clone()));

        let request = ProxyRequest::new(
            Method::POST,
            "/api/v1/calls",
            None,
            Some(Bytes::from_static(b"{\"a\":1}")),
        );
        let response = proxy.forward(request).await?;

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        let recorded = stub.recorded().await;
        assert_eq!(
            recorded[0].body.as_deref(),
            Some(b"{\"a\":1}".as_slice())
        );
        assert_eq!(
            recorded[0]
                .headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
            Some("Bearer ")
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_is_reported() -> Result<()> {
        let stub = StubUpstream::failing(UpstreamError::Unreachable {
            message: "connection refused".to_string(),
        });
        let proxy = ReverseProxy::from_config(&proxy_config(false)?, Arc::new(stub));

        let request = ProxyRequest::new(Method::GET, "/api/v1/calls", None, None);
        assert!(matches!(
            proxy.forward(request).await,
            Err(ProxyError::Upstream(UpstreamError::Unreachable { .. }))
        ));
        Ok(())
    }
}
