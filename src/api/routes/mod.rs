//! API routes module

pub mod chat;

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::api::state::AppState;

type SharedState = Arc<AppState>;

async fn health() -> &'static str {
    "ok"
}

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // Chat relay
        .nest("/chat", chat::router())
        // Liveness probe
        .route("/health", get(health))
}
