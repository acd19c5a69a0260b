use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    routing::{get, post},
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;

pub(crate) mod handlers;

pub use handlers::health::Health;
pub use handlers::session::{
    DeploymentMode, SESSION_COOKIE_NAME, SESSION_TTL_SECONDS, SessionCookie, SessionError,
    SessionState,
    types::{ErrorResponse, SessionStatusResponse},
};

use handlers::{health, session};

/// Routes without middleware; used directly by handler tests.
#[must_use]
pub fn router(state: Arc<SessionState>) -> Router {
    Router::new()
        .route("/api/session", post(session::establish).delete(session::clear))
        .route("/health", get(health::health))
        .layer(Extension(state))
}

/// Routes wrapped in request-id, tracing and (optionally) CORS layers.
///
/// # Errors
/// Returns an error if `frontend_origin` is not a valid origin URL.
pub fn app(state: Arc<SessionState>, frontend_origin: Option<&str>) -> Result<Router> {
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let Some(frontend_origin) = frontend_origin else {
        return Ok(app);
    };

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::exact(origin_header(frontend_origin)?))
        .allow_credentials(true);

    Ok(app.layer(cors))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: Arc<SessionState>, frontend_origin: Option<&str>) -> Result<()> {
    let app = app(state, frontend_origin)?;

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    serve(listener, app, shutdown_signal()).await
}

/// Serve `app` on an already bound listener until `shutdown` resolves.
///
/// # Errors
/// Return error if the server fails while running
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
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

fn origin_header(frontend_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_origin)
        .with_context(|| format!("Invalid frontend origin: {frontend_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {frontend_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_strips_path() -> Result<()> {
        let origin = origin_header("https://app.example.com/dashboard")?;
        assert_eq!(origin, "https://app.example.com");
        let origin = origin_header("http://localhost:3000/")?;
        assert_eq!(origin, "http://localhost:3000");
        Ok(())
    }

    #[test]
    fn origin_header_rejects_invalid_url() {
        assert!(origin_header("not a url").is_err());
    }
}
