pub mod protocol;
pub mod realtime;
pub mod rest;

use crate::manager::Manager;
use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state handed to every HTTP and WebSocket handler.
pub struct AppState {
    pub manager: Arc<Manager>,
    /// Outbound queue depth per real-time connection.
    pub client_buffer: usize,
}

pub fn router(state: Arc<AppState>, cors_permissive: bool) -> Router {
    let app = Router::new()
        .merge(rest::routes())
        .merge(realtime::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
