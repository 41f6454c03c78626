use axum::http::HeaderMap;
use axum::http::header::COOKIE;

pub const SESSION_COOKIE_NAME: &str = "user_session";
pub const EMAIL_COOKIE_NAME: &str = "user_email";
pub const SESSION_SENTINEL: &str = "logged_in";
pub const DEMO_EMAIL: &str = "demo@calltrackingmetrics.com";

/// Client-held session state. The server keeps nothing; the cookies are the
/// only authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub authenticated: bool,
    pub user_email: Option<String>,
}

impl Session {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_cookie_values(
            extract_cookie_value(headers, SESSION_COOKIE_NAME).as_deref(),
            extract_cookie_value(headers, EMAIL_COOKIE_NAME),
        )
    }

    pub fn from_cookie_values(session_cookie: Option<&str>, user_email: Option<String>) -> Self {
        Self {
            authenticated: is_session_sentinel(session_cookie),
            user_email,
        }
    }

    pub fn email_or_demo(&self) -> &str {
        self.user_email.as_deref().unwrap_or(DEMO_EMAIL)
    }
}

pub fn is_session_sentinel(value: Option<&str>) -> bool {
    value == Some(SESSION_SENTINEL)
}

/// Returns the first non-empty, percent-decoded value for `cookie_name`.
pub fn extract_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for part in raw.split(';') {
            let mut pieces = part.trim().splitn(2, '=');
            let key = pieces.next().unwrap_or_default().trim();
            let Some(value) = pieces.next() else {
                continue;
            };

            if key == cookie_name {
                let decoded = urlencoding::decode(value.trim())
                    .map(|value| value.into_owned())
                    .unwrap_or_else(|_| value.trim().to_string());
                return non_empty(decoded);
            }
        }
    }

    None
}

pub fn session_cookie(secure: bool) -> String {
    cookie_header(SESSION_COOKIE_NAME, SESSION_SENTINEL, secure)
}

pub fn email_cookie(email: &str, secure: bool) -> String {
    cookie_header(EMAIL_COOKIE_NAME, &urlencoding::encode(email), secure)
}

fn cookie_header(name: &str, value: &str, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax{secure_attr}")
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
