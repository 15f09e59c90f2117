//! HTTP Surface
//!
//! Thin axum layer over the orchestrator, the provider pools and the analysis
//! store. Handlers live in [`handlers`]; error mapping in [`error`].

mod error;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::ApiError;
pub use handlers::status_snapshot;

use crate::ai::{ChainConfig, ProviderChain, create_providers};
use crate::config::Config;
use crate::constants::server::MAX_BODY_BYTES;
use crate::pipeline::{Orchestrator, ProgressRegistry};
use crate::recorder::{SharedRecorder, create_recorder};
use crate::search::{HttpContentExtractor, SearchPool, SharedExtractor, create_search_providers};
use crate::storage::{SharedStore, create_store, open_shared_database};
use crate::types::Result;

#[derive(Clone)]
pub struct AppState {
    pub(crate) providers: ProviderChain,
    pub(crate) search: SearchPool,
    pub(crate) recorder: SharedRecorder,
    pub(crate) store: Option<SharedStore>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) progress: Arc<ProgressRegistry>,
}

impl AppState {
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Wire every collaborator from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let chain_config = ChainConfig::from_settings(&config.chain);
        let search = SearchPool::new(
            create_search_providers(&config.search.providers),
            chain_config.circuit_breaker.clone(),
        );
        let providers =
            ProviderChain::from_providers(create_providers(&config.providers), chain_config);
        let extractor: SharedExtractor = Arc::new(HttpContentExtractor::new(
            Duration::from_secs(config.search.fetch_timeout_secs),
            &config.search.user_agent,
        )?);

        let db = open_shared_database(config);
        let recorder = create_recorder(config, db.clone())?;
        let store: SharedStore = Arc::new(create_store(config, db));

        let orchestrator =
            Orchestrator::new(Arc::new(providers.clone()), extractor, recorder.clone())
                .with_search(search.clone())
                .with_store(store.clone())
                .with_config(config.pipeline.clone());

        Ok(Self {
            providers,
            search,
            recorder,
            store: Some(store),
            orchestrator: Arc::new(orchestrator),
            progress: Arc::new(ProgressRegistry::new()),
        })
    }
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(origins)
}

pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/analyze", post(handlers::analyze))
        .route("/status", get(handlers::status))
        .route("/reset_providers", post(handlers::reset_providers))
        .route("/validate_analysis", post(handlers::validate_analysis))
        .route("/list_analyses", get(handlers::list_analyses))
        .route("/get_analysis/{id}", get(handlers::get_analysis))
        .route("/stats", get(handlers::stats))
        .route("/progress/{session_id}", get(handlers::progress))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(build_cors(cors_origins))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    let app = build_router(state, &config.server.cors_origins);

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
