//! Facegate lets users register and log in with their face.
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod face;
mod router;
pub mod session;
pub mod store;
pub mod telemetry;
mod templates;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode, header};
use axum::{Router, middleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use auth::Authenticator;
use face::{FaceVerifier, OnnxEngine};
use session::SessionManager;
use store::FaceStore;

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub auth: Authenticator,
    pub sessions: SessionManager,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.http.timeout_secs);
    let body_limit = state.config.http.max_body_bytes;

    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout. Face verification can be slow on small hosts.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::COOKIE, header::SET_COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        .merge(router::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .route_layer(middleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let store = FaceStore::open(&config.storage.students_dir)?;

    let engine = OnnxEngine::new(config.face.onnx.clone())?;
    let verifier = FaceVerifier::new(
        Arc::new(engine),
        config.face.metric,
        config.face.threshold,
    );
    tracing::info!(
        model = %config.face.model_name,
        metric = %config.face.metric,
        threshold = verifier.threshold(),
        "face engine ready"
    );

    let sessions =
        SessionManager::new(config.session.secret_key(), config.session.lifetime())
            .secure(config.session.secure);

    Ok(AppState {
        auth: Authenticator::new(store, verifier),
        sessions,
        metrics,
        config,
    })
}

/// State backed by the stub face engine, storing faces in `dir`.
#[cfg(test)]
pub fn test_state(dir: &std::path::Path) -> AppState {
    test_state_with(dir, config::Configuration::default())
}

#[cfg(test)]
pub fn test_state_with(dir: &std::path::Path, config: config::Configuration) -> AppState {
    let verifier = FaceVerifier::new(
        Arc::new(face::stub::StubEngine),
        face::DistanceMetric::Cosine,
        Some(0.3),
    );

    AppState {
        config: Arc::new(config),
        auth: Authenticator::new(FaceStore::open(dir).unwrap(), verifier),
        sessions: SessionManager::new("test", Duration::from_secs(1800)),
        metrics: None,
    }
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
    cookie: Option<&str>,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// Encode form fields.
#[cfg(test)]
pub fn form(fields: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

/// `Cookie` header value carrying `data`.
#[cfg(test)]
pub fn cookie_for(state: &AppState, data: &session::SessionData) -> String {
    format!("{}={}", session::COOKIE_NAME, state.sessions.encode(data))
}

/// Session sent back by `response`, empty when cleared.
#[cfg(test)]
pub fn session_of(
    state: &AppState,
    response: &axum::http::Response<axum::body::Body>,
) -> session::SessionData {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.split(';').next())
        .and_then(|pair| pair.split_once('='))
        .and_then(|(_, value)| state.sessions.decode(value))
        .unwrap_or_default()
}
