use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8001";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_STATIC_DIR: &str = "public";
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 10_000;
const MIN_UPSTREAM_TIMEOUT_MS: u64 = 250;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DEMO_LOGIN_EMAIL: &str = "demo@calltrackingmetrics.com";
const DEFAULT_DEMO_LOGIN_PASSWORD: &str = "ctm-demo-123";
const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub static_dir: PathBuf,
    pub ctm_host: String,
    pub ctm_token: String,
    pub ctm_secret: String,
    pub ctm_account_id: String,
    pub ctm_api_base_url: String,
    pub proxy_base_url: String,
    pub proxy_full_passthrough: bool,
    pub upstream_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub demo_login_email: String,
    pub demo_login_password: String,
    pub login_basic_auth_precheck: bool,
    pub session_cookie_secure: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PHONE_GATEWAY_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("missing required environment variable {name}")]
    MissingRequired { name: &'static str },
    #[error("invalid {name} value '{value}': expected {expected}")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let bind_addr_raw =
            read("PHONE_GATEWAY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter =
            read("PHONE_GATEWAY_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = match read("PHONE_GATEWAY_LOG_FORMAT") {
            None => LogFormat::Text,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "PHONE_GATEWAY_LOG_FORMAT",
                        value,
                        expected: "text or json",
                    });
                }
            },
        };

        let static_dir = read("PHONE_GATEWAY_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR));

        let ctm_host = required(&read, "CTM_HOST")?;
        let ctm_token = required(&read, "CTM_TOKEN")?;
        let ctm_secret = required(&read, "CTM_SECRET")?;
        let ctm_account_id = required(&read, "CTM_ACCOUNT_ID")?;

        let ctm_api_base_url = read("CTM_API_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}", ctm_host.trim()));
        let proxy_base_url = read("CTM_PROXY_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{ctm_api_base_url}/api/v1"));

        let proxy_full_passthrough = bool_var(&read, "CTM_PROXY_FULL_PASSTHROUGH", false)?;
        let upstream_timeout_ms = u64_var(
            &read,
            "CTM_UPSTREAM_TIMEOUT_MS",
            DEFAULT_UPSTREAM_TIMEOUT_MS,
        )?
        .max(MIN_UPSTREAM_TIMEOUT_MS);
        let request_timeout_ms = u64_var(
            &read,
            "PHONE_GATEWAY_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?
        .max(upstream_timeout_ms);

        let demo_login_email =
            read("DEMO_LOGIN_EMAIL").unwrap_or_else(|| DEFAULT_DEMO_LOGIN_EMAIL.to_string());
        let demo_login_password =
            read("DEMO_LOGIN_PASSWORD").unwrap_or_else(|| DEFAULT_DEMO_LOGIN_PASSWORD.to_string());
        let login_basic_auth_precheck = bool_var(&read, "LOGIN_BASIC_AUTH_PRECHECK", false)?;
        let session_cookie_secure = bool_var(&read, "SESSION_COOKIE_SECURE", false)?;

        Ok(Self {
            bind_addr,
            log_filter,
            log_format,
            static_dir,
            ctm_host: ctm_host.trim().to_string(),
            ctm_token,
            ctm_secret,
            ctm_account_id: ctm_account_id.trim().to_string(),
            ctm_api_base_url,
            proxy_base_url,
            proxy_full_passthrough,
            upstream_timeout_ms,
            request_timeout_ms,
            demo_login_email,
            demo_login_password,
            login_basic_auth_precheck,
            session_cookie_secure,
        })
    }

    pub fn phone_access_url(&self) -> String {
        format!(
            "{}/api/v1/accounts/{}/phone_access",
            self.ctm_api_base_url, self.ctm_account_id
        )
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("log_filter", &self.log_filter)
            .field("log_format", &self.log_format)
            .field("static_dir", &self.static_dir)
            .field("ctm_host", &self.ctm_host)
            .field("ctm_token", &REDACTED)
            .field("ctm_secret", &REDACTED)
            .field("ctm_account_id", &self.ctm_account_id)
            .field("ctm_api_base_url", &self.ctm_api_base_url)
            .field("proxy_base_url", &self.proxy_base_url)
            .field("proxy_full_passthrough", &self.proxy_full_passthrough)
            .field("upstream_timeout_ms", &self.upstream_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("demo_login_email", &self.demo_login_email)
            .field("demo_login_password", &REDACTED)
            .field("login_basic_auth_precheck", &self.login_basic_auth_precheck)
            .field("session_cookie_secure", &self.session_cookie_secure)
            .finish()
    }
}

fn required<F>(read: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    read(name).ok_or(ConfigError::MissingRequired { name })
}

fn bool_var<F>(read: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = read(name) else {
        return Ok(default);
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value,
            expected: "a boolean",
        }),
    }
}

fn u64_var<F>(read: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = read(name) else {
        return Ok(default);
    };

    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value,
            expected: "an unsigned integer",
        })
}
