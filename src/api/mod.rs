use crate::{
    api::handlers::auth::{
        self, AuthState, ClientIp, RateLimitAction, RateLimitDecision,
    },
    store::NoteStore,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub mod email;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub mod sweep;

pub use openapi::openapi;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Server-level knobs that are not part of the auth flow.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    request_timeout: Duration,
    sweep_interval: Duration,
}

impl ServerConfig {
    /// Defaults: 30s request timeout, sweep every 5 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    auth_state: Arc<AuthState>,
    notes: Arc<dyn NoteStore>,
    server_config: ServerConfig,
) -> Result<()> {
    sweep::spawn_sweeper(auth_state.clone(), server_config.sweep_interval());

    let app = app(auth_state, notes, &server_config)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

/// Build the full application router.
///
/// Requests pass request-id, trace, CORS, timeout and the per-IP throttle in
/// that order; profile and notes routes additionally run the session guard.
///
/// # Errors
/// Returns an error if the configured frontend URL is not a valid origin.
pub fn app(
    auth_state: Arc<AuthState>,
    notes: Arc<dyn NoteStore>,
    server_config: &ServerConfig,
) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (public, _) = openapi::public_router().split_for_parts();
    let (protected, _) = openapi::protected_router().split_for_parts();
    let protected = protected.route_layer(middleware::from_fn(auth::require_session));

    let router = public
        .merge(protected)
        .route("/", get(handlers::root))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(TimeoutLayer::new(server_config.request_timeout()))
                .layer(Extension(auth_state))
                .layer(Extension(notes))
                .layer(middleware::from_fn(throttle)),
        );

    Ok(router)
}

/// Per-IP request throttle applied to every route.
///
/// Also stores the resolved `ClientIp` for the per-IP limits of the code handlers.
async fn throttle(
    auth_state: Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let client_ip = ClientIp::resolve(request.headers(), request.extensions());
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.ip(), RateLimitAction::Request)
        == RateLimitDecision::Limited
    {
        return handlers::error::ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests from this IP, please try again later",
        )
        .into_response();
    }
    request.extensions_mut().insert(client_ip);
    next.run(request).await
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
