//! HTTP server
//!
//! A thin axum layer over the generation engine.

pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

use std::future::Future;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::handle_health))
        .route("/api/health", get(handlers::health::handle_health))
        .route("/api/chat", post(handlers::chat::handle_chat))
        .route("/api/generate", post(handlers::generate::handle_generate))
        .route("/complete", post(handlers::complete::handle_complete))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then finish open connections.
pub async fn run_server<F>(state: AppState, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await
}
