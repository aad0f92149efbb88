use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::ErrorResponse;
use crate::health::health_route;
use crate::middleware::RequestLogger;
use crate::rate_limiter::RateLimiter;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::things::{thing_controller, ThingService};

#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
    max_body_bytes: usize,
}

/// Wraps `router` in an axum app: every request goes to a single fallback
/// that buffers the body and hands it to [`Router::handle`].
pub fn create_app(router: Arc<Router>, max_body_bytes: usize) -> axum::Router {
    axum::Router::new()
        .fallback(dispatch)
        .with_state(AppState {
            router,
            max_body_bytes,
        })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn dispatch(State(state): State<AppState>, request: axum::extract::Request) -> axum::response::Response {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, limit = state.max_body_bytes, "Rejected request body");
            return Response::json_with_status(
                StatusCode::PAYLOAD_TOO_LARGE,
                &ErrorResponse::new("Payload too large"),
            )
            .into_response();
        }
    };

    let mut request = Request::from_parts(parts.method, parts.uri, parts.headers, bytes);
    if let Some(addr) = peer {
        request = request.with_remote_addr(addr);
    }

    state.router.handle(request).await.into_response()
}

/// Assembles the service's router: the things controller behind the
/// rate limiter and request logger, plus the unthrottled health route.
/// The rate limiter is installed last so it runs first.
pub fn build_router(
    config: &Config,
    rate_limiter: Arc<RateLimiter>,
    things: Arc<dyn ThingService>,
) -> Router {
    Router::builder()
        .global_prefix(&config.global_prefix)
        .cors(config.cors())
        .controller(thing_controller(things))
        .route(health_route())
        .middleware(RequestLogger)
        .shared_middleware(rate_limiter)
        .build()
}

pub struct Server {
    app: axum::Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: &Config, router: Arc<Router>) -> Self {
        Self {
            app: create_app(router, config.max_body_bytes),
            bind_addr: config.bind_addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Turnstile server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
