use axum::{Router, routing::post};
use relay::Relay;
use std::sync::Arc;

pub mod error;
pub mod handlers;

use handlers::stream::stream_completion;

pub struct AppState {
    pub relay: Arc<dyn Relay>,
}

pub fn get_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/stream", post(stream_completion))
        .with_state(state)
}
