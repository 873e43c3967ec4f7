//! PCA API: HTTP boundary for the orchestrator
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod state;
pub mod system;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/api/execute", post(handlers::execute))
        .route("/api/status", get(handlers::status))
        .route("/api/status/", get(handlers::status))
        .route("/api/tools", get(handlers::tools))
        .route("/api/tools/", get(handlers::tools))
        .route("/api/history", get(handlers::history))
        .route("/api/health", get(handlers::health))
        .route("/api/similarity", get(handlers::similarity))
        .route("/metrics", get(handlers::metrics))
        .layer(from_fn(middleware::log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors())
        .with_state(state)
}

pub async fn run(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("PCA API listening on {}", addr);
    axum::serve(listener, app).await
}
