use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Form, FromRequest, Request};
use axum::http::HeaderValue;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::access_gate::{LOGIN_PATH, redirect_found};
use crate::config::Config;
use crate::session::{email_cookie, session_cookie};

/// Capability that decides whether a username/password pair is valid.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, username: &str, password: &str) -> bool;
}

/// Accepts exactly one configured pair.
#[derive(Clone)]
pub struct StaticCredentialValidator {
    username: String,
    password: String,
}

impl StaticCredentialValidator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.demo_login_email.clone(),
            config.demo_login_password.clone(),
        )
    }
}

impl fmt::Debug for StaticCredentialValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentialValidator")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentialValidator {
    async fn validate(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Login credentials from either a urlencoded form or a JSON body. A body
/// that cannot be read as either yields empty credentials, which the
/// validator rejects.
#[derive(Debug, Default)]
pub struct LoginSubmission(pub LoginForm);

#[async_trait]
impl<S> FromRequest<S> for LoginSubmission
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("json"));

        let parsed = if is_json {
            Json::<LoginForm>::from_request(request, state)
                .await
                .map(|Json(form)| form)
                .map_err(|rejection| rejection.body_text())
        } else {
            Form::<LoginForm>::from_request(request, state)
                .await
                .map(|Form(form)| form)
                .map_err(|rejection| rejection.body_text())
        };

        match parsed {
            Ok(form) => Ok(Self(form)),
            Err(reason) => {
                tracing::debug!(
                    target: "phone_gateway.login",
                    reason = %reason,
                    "unreadable login body; treating as empty credentials",
                );
                Ok(Self::default())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated { email: String },
    Rejected,
}

#[derive(Clone)]
pub struct LoginController {
    validator: Arc<dyn CredentialValidator>,
    secure_cookies: bool,
}

impl LoginController {
    pub fn new(validator: Arc<dyn CredentialValidator>, secure_cookies: bool) -> Self {
        Self {
            validator,
            secure_cookies,
        }
    }

    pub fn validator(&self) -> &Arc<dyn CredentialValidator> {
        &self.validator
    }

    pub async fn login(&self, form: LoginForm) -> LoginOutcome {
        if self.validator.validate(&form.username, &form.password).await {
            tracing::info!(target: "phone_gateway.login", email = %form.username, "login accepted");
            LoginOutcome::Authenticated {
                email: form.username,
            }
        } else {
            tracing::info!(target: "phone_gateway.login", "login rejected");
            LoginOutcome::Rejected
        }
    }

    /// `302 /` with both session cookies, or `302 /login` with none.
    pub fn respond(&self, outcome: LoginOutcome) -> Response {
        match outcome {
            LoginOutcome::Authenticated { email } => {
                let mut response = redirect_found("/");
                let headers = response.headers_mut();
                for cookie in [
                    session_cookie(self.secure_cookies),
                    email_cookie(&email, self.secure_cookies),
                ] {
                    match HeaderValue::from_str(&cookie) {
                        Ok(value) => {
                            headers.append(SET_COOKIE, value);
                        }
                        Err(error) => {
                            tracing::warn!(
                                target: "phone_gateway.login",
                                error = %error,
                                "failed to encode session cookie",
                            );
                            return redirect_found(LOGIN_PATH);
                        }
                    }
                }
                response
            }
            LoginOutcome::Rejected => redirect_found(LOGIN_PATH),
        }
    }
}

/// Splits an `Authorization: Basic` header into its username and password.
pub fn parse_basic_credentials(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::http::header::{LOCATION, SET_COOKIE};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;

    use super::{
        CredentialValidator, LoginController, LoginForm, LoginOutcome, StaticCredentialValidator,
        parse_basic_credentials,
    };

    fn controller() -> LoginController {
        LoginController::new(
            Arc::new(StaticCredentialValidator::new(
                "demo@calltrackingmetrics.com",
                "ctm-demo-123",
            )),
            false,
        )
    }

    fn form(username: &str, password: &str) -> LoginForm {
        LoginForm {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn static_validator_requires_both_fields() {
        let validator = StaticCredentialValidator::new("a@x.com", "pw");
        assert!(validator.validate("a@x.com", "pw").await);
        assert!(!validator.validate("b@x.com", "pw").await);
        assert!(!validator.validate("a@x.com", "PW").await);
        assert!(!validator.validate("", "").await);
    }

    #[tokio::test]
    async fn accepted_login_sets_both_cookies() {
        let controller = controller();
        let outcome = controller
            .login(form("demo@calltrackingmetrics.com", "ctm-demo-123"))
            .await;
        assert_eq!(
            outcome,
            LoginOutcome::Authenticated {
                email: "demo@calltrackingmetrics.com".to_string()
            }
        );

        let response = controller.respond(outcome);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|value| value.to_str().ok()),
            Some("/")
        );
        let cookies: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("user_session=logged_in;"));
        assert!(cookies[1].starts_with("user_email=demo%40calltrackingmetrics.com;"));
        assert!(cookies.iter().all(|cookie| cookie.contains("HttpOnly")));
        assert!(cookies.iter().all(|cookie| cookie.contains("Path=/")));
    }

    #[tokio::test]
    async fn rejected_login_redirects_without_cookies() {
        let controller = controller();
        let outcome = controller
            .login(form("demo@calltrackingmetrics.com", "wrong"))
            .await;
        assert_eq!(outcome, LoginOutcome::Rejected);

        let response = controller.respond(outcome);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|value| value.to_str().ok()),
            Some("/login")
        );
        assert!(response.headers().get(SET_COOKIE).is_none());
    }

    #[test]
    fn basic_credentials_parse() {
        let header = format!("Basic {}", STANDARD.encode("user@x.com:p:w"));
        assert_eq!(
            parse_basic_credentials(&header),
            Some(("user@x.com".to_string(), "p:w".to_string()))
        );
        assert_eq!(parse_basic_credentials("Bearer abc"), None);
        assert_eq!(parse_basic_credentials("Basic !!!"), None);
        assert_eq!(
            parse_basic_credentials(&format!("Basic {}", STANDARD.encode("nocolon"))),
            None
        );
    }
}
