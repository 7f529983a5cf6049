//! HTTP surface: health check and the conversion endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::payload::MultipartPayload;
use crate::runner::{JobRunner, Preconditions};

/// Shared state for all handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(runner: JobRunner, max_upload_bytes: usize) -> Self {
        Self {
            runner: Arc::new(runner),
            max_upload_bytes,
        }
    }
}

/// Builds the router with tracing and panic recovery layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        // Every method reaches the handler so that credentials are checked
        // before the method, matching the documented status precedence.
        .route("/convert-webp", any(convert_webp))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// GET /ping
async fn ping() -> &'static str {
    info!("Ping received");
    "pong"
}

/// /convert-webp
///
/// Expects `POST` with `Authorization: Bearer <secret>` and a multipart
/// `file` field. Responds with the converted `image/webp` bytes.
async fn convert_webp(State(state): State<AppState>, request: Request) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let runner = &state.runner;
    let job = runner.admit(remote);
    let pre = Preconditions::from_parts(request.method(), request.headers());

    match runner.run(job, &pre, MultipartPayload::new(request)).await {
        Ok(delivery) => delivery.into_response(),
        Err(err) => err.into_response(),
    }
}
