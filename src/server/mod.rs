//! HTTP API
//!
//! Query, answer and ingestion endpoints over the hybrid index, an SSE
//! stream of ingestion progress, and a read-only view of the corpus.

mod data;
mod handlers;
mod response;

pub use response::{ApiError, ApiResponse, ApiResult};

use crate::answer::Answerer;
use crate::app::App;
use crate::config::{IngestConfig, ServerConfig};
use crate::corpus::Corpus;
use crate::error::{HolocronError, Result};
use crate::ingest::IngestPipeline;
use crate::progress::{ProgressRegistry, ProgressEvent, ProgressKind};
use crate::retrieval::HybridSearcher;
use crate::store::IndexHandle;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub corpus: Arc<Corpus>,
    pub searcher: Arc<HybridSearcher>,
    pub answerer: Arc<Answerer>,
    pub pipeline: Arc<IngestPipeline>,
    pub progress: Arc<ProgressRegistry>,
    pub index: Arc<IndexHandle>,
    pub corpus_path: PathBuf,
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

impl AppState {
    pub fn new(app: &App, corpus: Corpus) -> Result<Self> {
        let searcher = Arc::new(app.searcher()?);
        let answerer = Arc::new(app.answerer(Arc::clone(&searcher)));
        Ok(Self {
            corpus: Arc::new(corpus),
            searcher,
            answerer,
            pipeline: Arc::new(app.pipeline()),
            progress: Arc::new(ProgressRegistry::new(app.config.server.progress_buffer)),
            index: Arc::clone(&app.index),
            corpus_path: app.config.storage.corpus_path()?,
            ingest: app.config.ingest.clone(),
            server: app.config.server.clone(),
        })
    }

    /// Start an ingestion run in the background; returns its progress session id.
    ///
    /// The pipeline is claimed before this returns, so a concurrent caller
    /// gets `AlreadyRunning`. The session is dropped once
    /// `server.progress_retention_secs` have passed after the run ends.
    pub fn start_ingest(&self, session: Option<String>) -> ApiResult<String> {
        let permit = self.pipeline.reserve()?;
        let session = session.unwrap_or_else(ProgressRegistry::new_session_id);
        if !self.progress.register(&session) {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                format!("Progress session '{}' already exists", session),
            ));
        }
        let emitter = self.progress.emitter(&session);
        let progress = Arc::clone(&self.progress);
        let pipeline = Arc::clone(&self.pipeline);
        let path = self.corpus_path.clone();
        let retries = self.ingest.read_retries;
        let backoff = Duration::from_millis(self.ingest.retry_backoff_ms);
        let retention = Duration::from_secs(self.server.progress_retention_secs);

        emitter.emit(ProgressEvent::new(
            ProgressKind::Started,
            "Ingestion scheduled",
        ));
        tokio::spawn(async move {
            let result = pipeline
                .run_from_file_reserved(permit, &path, retries, backoff, &emitter)
                .await;
            if let Err(e) = result {
                tracing::warn!(session = emitter.session(), "Background ingestion ended: {}", e);
            }
            let session = emitter.session().to_string();
            drop(emitter);
            tokio::time::sleep(retention).await;
            progress.remove(&session);
            tracing::debug!("Dropped progress session {}", session);
        });
        tracing::info!("Started ingestion (session {})", session);
        Ok(session)
    }
}

/// Build the router with CORS and request tracing
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::status))
        .route("/api/search", post(handlers::search))
        .route("/api/ask", post(handlers::ask))
        .route("/api/ingest", post(handlers::ingest))
        .route("/api/progress/{session}", get(handlers::progress))
        .route("/api/embeddings", get(handlers::embeddings))
        .route("/api/{collection}", get(data::list))
        .route("/api/{collection}/{id}", get(data::get_one))
        .route("/api/{collection}/{id}/{related}", get(data::related))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(values))
}

/// Serve until Ctrl-C or SIGTERM
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HolocronError::Io {
            source: e,
            context: format!("Failed to bind {}", addr),
        })?;

    tracing::info!("API server listening on http://{}/api", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| HolocronError::Io {
            source: e,
            context: "Server error".to_string(),
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to setup SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
    tracing::info!("Shutdown signal received");
}
