//! Exchanges the application credential for a short-lived upstream phone
//! access token on behalf of the user identified by the session cookies.

use std::fmt;
use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::session::DEMO_EMAIL;
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamRequest};

pub const DUMMY_SESSION_ID: &str = "dummy_session_id";
const DEFAULT_FIRST_NAME: &str = "John";
const DEFAULT_LAST_NAME: &str = "Doe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTokenRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub session_id: String,
}

impl AccessTokenRequest {
    pub fn from_cookies(session_cookie: Option<&str>, email_cookie: Option<&str>) -> Self {
        let email = email_cookie
            .filter(|value| !value.is_empty())
            .unwrap_or(DEMO_EMAIL)
            .to_string();
        let session_id = session_cookie
            .filter(|value| !value.is_empty())
            .unwrap_or(DUMMY_SESSION_ID)
            .to_string();
        let (first_name, last_name) = derive_names(&email);

        Self {
            email,
            first_name,
            last_name,
            session_id,
        }
    }
}

/// Upstream fields are kept as raw JSON; a field the upstream omits is
/// omitted again when the enhanced response is serialized.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessTokenResponse {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub token: Option<Value>,
    #[serde(default)]
    pub valid_until: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancedAccessTokenResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<Value>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub email: String,
    pub last_name: String,
    pub first_name: String,
}

impl EnhancedAccessTokenResponse {
    fn new(upstream: AccessTokenResponse, request: AccessTokenRequest) -> Self {
        Self {
            status: upstream.status,
            token: upstream.token,
            valid_until: upstream.valid_until,
            session_id: request.session_id,
            email: request.email,
            last_name: request.last_name,
            first_name: request.first_name,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Non-2xx from upstream; `body` is the upstream text, untouched.
    #[error("phone access request rejected by upstream ({status})")]
    UpstreamRejected { status: StatusCode, body: String },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("invalid phone access response payload: {message}")]
    InvalidPayload { message: String },
    #[error("application credential cannot be sent as a header: {message}")]
    InvalidCredential { message: String },
}

#[derive(Clone)]
pub struct CredentialBroker {
    upstream: Arc<dyn UpstreamClient>,
    endpoint_url: String,
    authorization: HeaderValue,
}

impl CredentialBroker {
    pub fn from_config(
        config: &Config,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, BrokerError> {
        let credential = STANDARD.encode(format!("{}:{}", config.ctm_token, config.ctm_secret));
        let mut authorization = HeaderValue::from_str(&format!("Basic {credential}"))
            .map_err(|error| BrokerError::InvalidCredential {
                message: error.to_string(),
            })?;
        authorization.set_sensitive(true);

        Ok(Self {
            upstream,
            endpoint_url: config.phone_access_url(),
            authorization,
        })
    }

    pub async fn request_access_token(
        &self,
        session_cookie: Option<&str>,
        email_cookie: Option<&str>,
    ) -> Result<EnhancedAccessTokenResponse, BrokerError> {
        let request = AccessTokenRequest::from_cookies(session_cookie, email_cookie);

        tracing::info!(
            target: "phone_gateway.broker",
            email = %request.email,
            first_name = %request.first_name,
            last_name = %request.last_name,
            session_id = %request.session_id,
            "requesting phone access token from upstream",
        );

        let body = serde_json::to_vec(&request).map_err(|error| BrokerError::InvalidPayload {
            message: error.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.authorization.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .upstream
            .send(UpstreamRequest {
                method: Method::POST,
                url: self.endpoint_url.clone(),
                headers,
                body: Some(body.into()),
            })
            .await
            .inspect_err(|error| {
                tracing::warn!(
                    target: "phone_gateway.broker",
                    error = %error,
                    "phone access upstream call failed",
                );
            })?;

        if !response.status.is_success() {
            tracing::warn!(
                target: "phone_gateway.broker",
                status = %response.status,
                "phone access request rejected by upstream",
            );
            return Err(BrokerError::UpstreamRejected {
                status: response.status,
                body: response.body,
            });
        }

        let upstream: AccessTokenResponse =
            serde_json::from_str(&response.body).map_err(|error| BrokerError::InvalidPayload {
                message: error.to_string(),
            })?;

        Ok(EnhancedAccessTokenResponse::new(upstream, request))
    }
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("endpoint_url", &self.endpoint_url)
            .field("authorization", &"Basic <redacted>")
            .finish_non_exhaustive()
    }
}

/// First and last name from the email's local part, split on `.`.
pub fn derive_names(email: &str) -> (String, String) {
    let local = email.split('@').next().unwrap_or_default();
    let parts: Vec<&str> = local.split('.').collect();

    let first_name = match parts.first() {
        Some(first) if !first.is_empty() => (*first).to_string(),
        _ => DEFAULT_FIRST_NAME.to_string(),
    };
    let last_name = if parts.len() > 1 {
        parts.last().copied().unwrap_or_default().to_string()
    } else {
        DEFAULT_LAST_NAME.to_string()
    };

    (first_name, last_name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{Method, StatusCode};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::{Value, json};

    use super::{AccessTokenRequest, BrokerError, CredentialBroker, DUMMY_SESSION_ID, derive_names};
    use crate::config::Config;
    use crate::upstream::UpstreamError;
    use crate::upstream::stub::StubUpstream;

    fn broker_config() -> Result<Config> {
        let vars = [
            ("CTM_HOST", "ctm.test"),
            ("CTM_TOKEN", "tok"),
            ("CTM_SECRET", "sec-ret"),
            ("CTM_ACCOUNT_ID", "77"),
        ];
        Ok(Config::from_lookup(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        })?)
    }

    #[test]
    fn names_derive_from_local_part() {
        assert_eq!(
            derive_names("jane.doe@x.com"),
            ("jane".to_string(), "doe".to_string())
        );
        assert_eq!(
            derive_names("admin@x.com"),
            ("admin".to_string(), "Doe".to_string())
        );
        assert_eq!(
            derive_names("mary.ann.smith@x.com"),
            ("mary".to_string(), "smith".to_string())
        );
        assert_eq!(
            derive_names(".hidden@x.com"),
            ("John".to_string(), "hidden".to_string())
        );
        assert_eq!(derive_names(""), ("John".to_string(), "Doe".to_string()));
    }

    #[test]
    fn session_id_defaults_only_when_cookie_absent() {
        let request = AccessTokenRequest::from_cookies(None, None);
        assert_eq!(request.session_id, DUMMY_SESSION_ID);
        assert_eq!(request.email, "demo@calltrackingmetrics.com");
        assert_eq!(request.first_name, "demo");
        assert_eq!(request.last_name, "Doe");

        let request = AccessTokenRequest::from_cookies(Some("logged_in"), Some("jane.doe@x.com"));
        assert_eq!(request.session_id, "logged_in");
        assert_eq!(request.email, "jane.doe@x.com");

        let request = AccessTokenRequest::from_cookies(Some("opaque-123"), None);
        assert_eq!(request.session_id, "opaque-123");
    }

    #[tokio::test]
    async fn successful_exchange_echoes_identity() -> Result<()> {
        let stub = StubUpstream::responding(
            StatusCode::OK,
            r#"{"status":"ok","token":"T","valid_until":"2099-01-01"}"#,
        );
        let broker = CredentialBroker::from_config(&broker_config()?, Arc::new(stub.clone()))?;

        let response = broker
            .request_access_token(Some("logged_in"), Some("jane.doe@x.com"))
            .await?;
        let body = serde_json::to_value(&response)?;
        assert_eq!(
            body,
            json!({
                "status": "ok",
                "token": "T",
                "valid_until": "2099-01-01",
                "sessionId": "logged_in",
                "email": "jane.doe@x.com",
                "last_name": "doe",
                "first_name": "jane",
            })
        );

        let recorded = stub.recorded().await;
        assert_eq!(recorded.len(), 1);
        let sent = &recorded[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(
            sent.url,
            "https://ctm.test/api/v1/accounts/77/phone_access"
        );
        let expected_auth = format!("Basic {}", STANDARD.encode("tok:sec-ret"));
        assert_eq!(
            sent.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()),
            Some(expected_auth.as_str())
        );
        assert!(
            sent.headers
                .get(AUTHORIZATION)
                .is_some_and(|value| value.is_sensitive())
        );
        assert_eq!(
            sent.headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
        let sent_body: Value = serde_json::from_slice(sent.body.as_deref().unwrap_or_default())?;
        assert_eq!(
            sent_body,
            json!({
                "email": "jane.doe@x.com",
                "first_name": "jane",
                "last_name": "doe",
                "session_id": "logged_in",
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_upstream_fields_are_omitted() -> Result<()> {
        let stub = StubUpstream::responding(StatusCode::CREATED, r#"{"token":"only"}"#);
        let broker = CredentialBroker::from_config(&broker_config()?, Arc::new(stub))?;

        let response = broker.request_access_token(None, None).await?;
        let body = serde_json::to_value(&response)?;
        assert_eq!(body["token"], "only");
        assert!(body.get("status").is_none());
        assert!(body.get("valid_until").is_none());
        assert_eq!(body["sessionId"], DUMMY_SESSION_ID);
        Ok(())
    }

    #[tokio::test]
    async fn upstream_rejection_keeps_raw_body() -> Result<()> {
        let stub = StubUpstream::responding(StatusCode::FORBIDDEN, "forbidden");
        let broker = CredentialBroker::from_config(&broker_config()?, Arc::new(stub))?;

        match broker.request_access_token(None, None).await {
            Err(BrokerError::UpstreamRejected { status, body }) => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "forbidden");
            }
            other => anyhow::bail!("expected upstream rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_and_bad_payload_are_distinct() -> Result<()> {
        let stub = StubUpstream::failing(UpstreamError::Timeout {
            message: "deadline elapsed".to_string(),
        });
        let broker = CredentialBroker::from_config(&broker_config()?, Arc::new(stub))?;
        assert!(matches!(
            broker.request_access_token(None, None).await,
            Err(BrokerError::Upstream(UpstreamError::Timeout { .. }))
        ));

        let stub = StubUpstream::responding(StatusCode::OK, "<html>not json</html>");
        let broker = CredentialBroker::from_config(&broker_config()?, Arc::new(stub))?;
        assert!(matches!(
            broker.request_access_token(None, None).await,
            Err(BrokerError::InvalidPayload { .. })
        ));
        Ok(())
    }

    #[test]
    fn debug_output_never_contains_credential() -> Result<()> {
        let broker = CredentialBroker::from_config(
            &broker_config()?,
            Arc::new(StubUpstream::default()),
        )?;
        let rendered = format!("{broker:?}");
        assert!(!rendered.contains("sec-ret"));
        assert!(!rendered.contains(&STANDARD.encode("tok:sec-ret")));
        Ok(())
    }
}
