//! Axum HTTP channel.
//!
//! ## URL layout
//!
//! ```text
//! GET    /detect                     reachability probe
//! POST   /detect                     single frame (raw body)
//! POST   /reset_counts
//! GET    /get_summaries
//! GET    /get_percentages
//! DELETE /delete_summary/{id}
//! POST   /api/detect                 batch upload (multipart "images")
//! GET    /api/summary
//! DELETE /api/delete_batch/{batch_id}
//! GET    /api/health
//! GET    /stream                     server-sent events
//! ```
//!
//! Implements [`Component`]; the shutdown token drives axum's graceful
//! shutdown and closes open `/stream` responses.

mod api;
mod stream;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::AppError;
use crate::subsystems::runtime::{Component, ComponentFuture};

use super::CommsState;

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AxumState {
    pub channel_id: Arc<str>,
    pub comms: Arc<CommsState>,
    /// Cancelled on shutdown; ends long-lived `/stream` responses.
    pub shutdown: CancellationToken,
}

// ── AxumChannel ───────────────────────────────────────────────────────────────

pub struct AxumChannel {
    channel_id: String,
    bind_addr: String,
    max_body_bytes: usize,
    state: Arc<CommsState>,
}

impl AxumChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        max_body_bytes: usize,
        state: Arc<CommsState>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            max_body_bytes,
            state,
        }
    }
}

impl Component for AxumChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_axum(*self, shutdown))
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

async fn run_axum(channel: AxumChannel, shutdown: CancellationToken) -> Result<(), AppError> {
    let AxumChannel { channel_id, bind_addr, max_body_bytes, state } = channel;

    let router = router(
        AxumState {
            channel_id: Arc::from(channel_id.as_str()),
            comms: state,
            shutdown: shutdown.clone(),
        },
        max_body_bytes,
    );

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("http bind failed on {bind_addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| AppError::Comms(format!("http local address: {e}")))?;

    info!(%channel_id, addr = %local, "http channel listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Comms(format!("http server error: {e}")))?;

    info!(%channel_id, "http channel shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the full router over `comms`. Used by the channel and by tests.
pub fn build_router(
    comms: Arc<CommsState>,
    max_body_bytes: usize,
    shutdown: CancellationToken,
) -> Router {
    router(AxumState { channel_id: Arc::from("http"), comms, shutdown }, max_body_bytes)
}

fn router(state: AxumState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Live detection session
        .route("/detect",                      get(api::detect_probe).post(api::detect_frame))
        .route("/reset_counts",                post(api::reset_counts))
        .route("/get_summaries",               get(api::get_summaries))
        .route("/get_percentages",             get(api::get_percentages))
        .route("/delete_summary/{id}",         delete(api::delete_summary))
        // Batch uploads
        .route("/api/detect",                  post(api::detect_batch))
        .route("/api/summary",                 get(api::batch_summary))
        .route("/api/delete_batch/{batch_id}", delete(api::delete_batch))
        .route("/api/health",                  get(api::health))
        // Push channel
        .route("/stream",                      get(stream::subscribe))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
