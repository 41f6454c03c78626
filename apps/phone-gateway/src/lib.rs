use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod access_gate;
pub mod api_envelope;
pub mod config;
pub mod credential_broker;
pub mod login;
pub mod reverse_proxy;
pub mod session;
pub mod upstream;
pub mod web_maud;

use crate::access_gate::access_gate;
use crate::api_envelope::{ApiErrorCode, error_into_response};
use crate::config::Config;
use crate::credential_broker::{BrokerError, CredentialBroker};
use crate::login::{
    CredentialValidator, LoginController, LoginSubmission, StaticCredentialValidator,
    parse_basic_credentials,
};
use crate::reverse_proxy::{ProxyError, ProxyRequest, ReverseProxy};
use crate::session::{EMAIL_COOKIE_NAME, SESSION_COOKIE_NAME, Session, extract_cookie_value};
use crate::upstream::{ReqwestUpstreamClient, UpstreamClient, UpstreamError};
use crate::web_maud::{PageKind, WidgetPage, render_login_page, render_widget_page};

const SERVICE_NAME: &str = "phone-gateway";
const ROUTE_LOGIN: &str = "/login";
const ROUTE_CTM_ACCESS: &str = "/api/ctm_access";
const ROUTE_API_V1_PROXY: &str = "/api/v1/*path";
const ROUTE_API_V1_ROOT: &str = "/api/v1";
const ROUTE_API_V1_ROOT_SLASH: &str = "/api/v1/";
const BASIC_AUTH_CHALLENGE: &str = "Basic realm=\"phone-gateway\"";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    broker: CredentialBroker,
    proxy: ReverseProxy,
    login: LoginController,
    started_at: SystemTime,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Production wiring: `reqwest` upstream client and the static credential
/// validator from config.
pub fn build_router(config: Config) -> Result<Router, GatewayError> {
    let upstream: Arc<dyn UpstreamClient> = Arc::new(ReqwestUpstreamClient::from_config(&config)?);
    let validator: Arc<dyn CredentialValidator> =
        Arc::new(StaticCredentialValidator::from_config(&config));
    build_router_with_dependencies(config, upstream, validator)
}

pub fn build_router_with_dependencies(
    config: Config,
    upstream: Arc<dyn UpstreamClient>,
    validator: Arc<dyn CredentialValidator>,
) -> Result<Router, GatewayError> {
    let broker = CredentialBroker::from_config(&config, upstream.clone())?;
    let proxy = ReverseProxy::from_config(&config, upstream);
    let login = LoginController::new(validator, config.session_cookie_secure);
    let request_timeout = Duration::from_millis(config.request_timeout_ms);
    let static_dir = config.static_dir.clone();
    let basic_auth_precheck = config.login_basic_auth_precheck;

    let state = AppState {
        config: Arc::new(config),
        broker,
        proxy,
        login,
        started_at: SystemTime::now(),
    };

    let login_submit_route = if basic_auth_precheck {
        post(login_submit).route_layer(middleware::from_fn_with_state(
            state.clone(),
            login_basic_auth_gate,
        ))
    } else {
        post(login_submit)
    };

    let router = Router::new()
        .route("/healthz", get(health))
        .route(ROUTE_LOGIN, get(login_page).merge(login_submit_route))
        .route("/", get(index_page))
        .route("/device", get(device_page))
        .route("/phone", get(phone_page))
        .route("/agent-status", get(agent_status_page))
        .route("/dialer-only", get(dialer_only_page))
        .route(ROUTE_CTM_ACCESS, post(ctm_access))
        .route(ROUTE_API_V1_ROOT, any(proxy_api_v1))
        .route(ROUTE_API_V1_ROOT_SLASH, any(proxy_api_v1))
        .route(ROUTE_API_V1_PROXY, any(proxy_api_v1))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
        .layer(middleware::from_fn(access_gate))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        );

    Ok(router)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

async fn login_page() -> Html<String> {
    Html(render_login_page())
}

async fn login_submit(
    State(state): State<AppState>,
    LoginSubmission(form): LoginSubmission,
) -> Response {
    let outcome = state.login.login(form).await;
    state.login.respond(outcome)
}

async fn login_basic_auth_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_credentials);

    if let Some((username, password)) = credentials {
        if state.login.validator().validate(&username, &password).await {
            return next.run(request).await;
        }
    }

    tracing::info!(
        target: "phone_gateway.login",
        "basic auth pre-check failed for login submission",
    );
    let mut response = error_into_response(ApiErrorCode::Unauthorized, "Invalid credentials.");
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static(BASIC_AUTH_CHALLENGE),
    );
    response
}

fn widget_page(state: &AppState, kind: PageKind, email: Option<&str>) -> Html<String> {
    Html(render_widget_page(&WidgetPage {
        kind,
        ctm_host: &state.config.ctm_host,
        email,
    }))
}

async fn index_page(State(state): State<AppState>) -> Html<String> {
    widget_page(&state, PageKind::Index, None)
}

async fn device_page(State(state): State<AppState>) -> Html<String> {
    widget_page(&state, PageKind::Device, None)
}

async fn phone_page(State(state): State<AppState>) -> Html<String> {
    widget_page(&state, PageKind::Phone, None)
}

async fn agent_status_page(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let session = Session::from_headers(&headers);
    widget_page(&state, PageKind::AgentStatus, Some(session.email_or_demo()))
}

async fn dialer_only_page(State(state): State<AppState>) -> Html<String> {
    widget_page(&state, PageKind::DialerOnly, None)
}

async fn ctm_access(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_cookie = extract_cookie_value(&headers, SESSION_COOKIE_NAME);
    let email_cookie = extract_cookie_value(&headers, EMAIL_COOKIE_NAME);

    match state
        .broker
        .request_access_token(session_cookie.as_deref(), email_cookie.as_deref())
        .await
    {
        Ok(token) => (StatusCode::OK, Json(token)).into_response(),
        Err(error) => broker_error_response(error),
    }
}

async fn proxy_api_v1(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw_target = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |value| value.as_str());
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let request = ProxyRequest::new(method, raw_target, authorization, Some(body));

    match state.proxy.forward(request).await {
        Ok(response) => (
            response.status,
            [(CONTENT_TYPE, "application/json")],
            response.body,
        )
            .into_response(),
        Err(error) => proxy_error_response(error),
    }
}

fn broker_error_response(error: BrokerError) -> Response {
    match error {
        BrokerError::UpstreamRejected { body, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
        BrokerError::Upstream(error) => upstream_error_response(&error),
        BrokerError::InvalidPayload { message } => error_into_response(
            ApiErrorCode::InvalidUpstreamResponse,
            format!("Phone access service returned an invalid payload: {message}"),
        ),
        BrokerError::InvalidCredential { .. } => error_into_response(
            ApiErrorCode::InternalError,
            "Phone access credential is misconfigured.",
        ),
    }
}

fn proxy_error_response(error: ProxyError) -> Response {
    match error {
        ProxyError::InvalidToken { message } => error_into_response(
            ApiErrorCode::InvalidRequest,
            format!("Authorization header is not a valid bearer token: {message}"),
        ),
        ProxyError::Upstream(error) => upstream_error_response(&error),
    }
}

fn upstream_error_response(error: &UpstreamError) -> Response {
    match error {
        UpstreamError::Timeout { .. } => error_into_response(
            ApiErrorCode::UpstreamTimeout,
            "Upstream service did not respond in time.",
        ),
        UpstreamError::Unreachable { .. } => error_into_response(
            ApiErrorCode::UpstreamUnavailable,
            "Upstream service is unavailable.",
        ),
        UpstreamError::Client { .. } => {
            error_into_response(ApiErrorCode::InternalError, "Upstream client unavailable.")
        }
    }
}
