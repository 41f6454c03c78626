//! Session-cookie access control.
//!
//! The policy is an ordered rule table plus the session sentinel check. It is
//! pure: the decision depends only on the request path and the [`Session`]
//! read from the cookies, so it can be exercised without a router.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::session::Session;

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExemptionRule {
    Exact(&'static str),
    Prefix(&'static str),
    Suffix(&'static str),
}

impl ExemptionRule {
    pub fn matches(self, path: &str) -> bool {
        match self {
            Self::Exact(expected) => path == expected,
            Self::Prefix(prefix) => path.starts_with(prefix),
            Self::Suffix(suffix) => path.ends_with(suffix),
        }
    }
}

/// Evaluated top to bottom; the first match wins.
pub const EXEMPTION_RULES: &[ExemptionRule] = &[
    ExemptionRule::Exact(LOGIN_PATH),
    ExemptionRule::Prefix("/public/"),
    ExemptionRule::Prefix("/api/"),
    ExemptionRule::Suffix(".js"),
    ExemptionRule::Suffix(".css"),
    ExemptionRule::Suffix(".json"),
    ExemptionRule::Suffix(".map"),
    ExemptionRule::Exact("/healthz"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Exempt(ExemptionRule),
    Authenticated,
    Denied,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

pub fn matching_exemption(path: &str) -> Option<ExemptionRule> {
    EXEMPTION_RULES
        .iter()
        .copied()
        .find(|rule| rule.matches(path))
}

pub fn decide(path: &str, session: &Session) -> AccessDecision {
    if let Some(rule) = matching_exemption(path) {
        return AccessDecision::Exempt(rule);
    }

    if session.authenticated {
        AccessDecision::Authenticated
    } else {
        AccessDecision::Denied
    }
}

/// Router-wide middleware. Denied requests are redirected to the login page
/// and never reach a handler.
pub async fn access_gate(request: Request, next: Next) -> Response {
    let session = Session::from_headers(request.headers());
    let decision = decide(request.uri().path(), &session);

    if decision.is_allowed() {
        return next.run(request).await;
    }

    tracing::debug!(
        target: "phone_gateway.gate",
        method = %request.method(),
        path = %request.uri().path(),
        "session missing or invalid; redirecting to login",
    );
    redirect_found(LOGIN_PATH)
}

pub fn redirect_found(location: &'static str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}
