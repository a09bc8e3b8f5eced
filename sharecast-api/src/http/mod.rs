// HTTP/REST API module

pub mod error;
pub mod health;
pub mod presence;
pub mod signaling;
pub mod streams;

use std::sync::Arc;

use axum::Router;
use sharecast_hub::{PresenceStore, StreamBroadcaster};
use sharecast_proxy::SignalingProxy;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<dyn PresenceStore>,
    pub broadcaster: Arc<StreamBroadcaster>,
    pub proxy: SignalingProxy,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .merge(presence::create_presence_router())
        .merge(streams::create_streams_router())
        .merge(signaling::create_signaling_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A query parameter that must be present and non-empty
pub(crate) fn required(value: Option<String>, name: &str) -> AppResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::bad_request(format!("Missing required parameter: {name}")))
}
