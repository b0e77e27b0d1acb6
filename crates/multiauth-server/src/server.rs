//! MultiAuth HTTP server

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use multiauth_core::{config::ServerConfig, MultiAuth, Result};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use crate::metrics::{metrics_handler, metrics_middleware, MetricsRecorder};
use crate::routes;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub multiauth: Arc<MultiAuth>,
    pub metrics: Arc<MetricsRecorder>,
}

impl AppState {
    pub fn new(multiauth: Arc<MultiAuth>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { multiauth, metrics }
    }
}

/// Build the router serving the MultiAuth API
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/providers", get(routes::list_providers))
        .route("/login/{provider}", post(routes::login))
        .route("/identities", get(routes::search_identities))
        .route("/identities/refresh", post(routes::refresh_identity))
        .route("/identities/{provider}/{identifier}", get(routes::get_identity))
        .route("/identities/{provider}/{identifier}/groups", get(routes::get_identity_groups))
        .route("/groups", get(routes::search_groups))
        .route("/groups/{provider}/{name}", get(routes::get_group))
        .route("/groups/{provider}/{name}/members/{identifier}", get(routes::has_member));

    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(false)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// MultiAuth server
pub struct MultiAuthServer {
    config: ServerConfig,
    multiauth: Arc<MultiAuth>,
}

impl MultiAuthServer {
    pub fn new(config: ServerConfig, multiauth: MultiAuth) -> Self {
        Self {
            config,
            multiauth: Arc::new(multiauth),
        }
    }

    pub async fn run(self) -> Result<()> {
        let metrics = Arc::new(MetricsRecorder::install()?);
        info!("Prometheus metrics initialized");

        let app = create_router(AppState::new(self.multiauth.clone(), metrics));
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        info!("MultiAuth server listening on http://{}", addr);
        info!("API available at http://{}/api/v1", addr);
        info!("Prometheus metrics at http://{}/metrics", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("MultiAuth server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
