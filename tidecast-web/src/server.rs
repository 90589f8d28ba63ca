//! HTTP server for Tidecast
//!
//! One shared [`RelayService`] behind an `Arc`; every request runs its own
//! fetch and transcoding session.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::routing::get;
use chrono::{DateTime, Utc};
use tidecast_core::{RelayService, TidecastConfig};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span};

use crate::handlers::{audio_remux, health, info as media_info, stream_head, transcode};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The relay pipeline
    pub service: Arc<RelayService>,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wraps a service, stamping the start time.
    pub fn new(service: RelayService) -> Self {
        Self {
            service: Arc::new(service),
            started_at: Utc::now(),
        }
    }
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transcode", get(transcode).head(stream_head))
        .route("/audio-remux", get(audio_remux).head(stream_head))
        .route("/info", get(media_info))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The query string carries the source URL, credentials included, so only
/// the path is recorded.
fn request_span(request: &Request) -> Span {
    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path()
    )
}

/// Serves `state` on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// - `std::io::Error` - Accepting connections failed
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Builds the production service, binds the configured address and serves
/// until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - Service construction, bind or serve failed
pub async fn run_server(config: TidecastConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind_address = config.server.bind_address();
    let service = RelayService::new(config)?;

    if !service.engine_available().await {
        tracing::warn!(
            engine = service.engine_name(),
            "Transcoding engine not available; streaming requests will fail"
        );
    }

    let listener = TcpListener::bind(&bind_address).await?;
    info!("Tidecast relay listening on http://{}", listener.local_addr()?);

    serve(listener, AppState::new(service), shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested, draining connections");
}
