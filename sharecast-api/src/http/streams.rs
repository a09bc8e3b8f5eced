//! Stream listing and live stream updates
//!
//! `GET /streams` is a straight passthrough of the relay's listing.
//! `GET /streams/sse` keeps a Server-Sent Events connection open and pushes
//! `connected`, `streams_update` and `heartbeat` events for one room.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use sharecast_core::models::RoomId;
use sharecast_proxy::{cors::read_only_cors, forward_relay_response};
use tracing::info;

use crate::http::{error::AppResult, required, AppState};

pub fn create_streams_router() -> Router<AppState> {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/streams/sse", get(stream_events))
        .layer(read_only_cors())
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamsQuery {
    pub room: Option<String>,
}

/// Relay stream list, unmodified
///
/// GET /streams
pub async fn list_streams(State(state): State<AppState>) -> AppResult<Response> {
    let response = state.proxy.relay().streams_raw().await?;
    Ok(forward_relay_response(response, "application/json"))
}

/// Subscribe to stream changes for a room
///
/// GET /streams/sse?room={room}
///
/// Each event is a single `data: <json>` frame. The first is always `connected`;
/// if the room already has streams a `streams_update` replay follows.
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamsQuery>,
) -> AppResult<impl IntoResponse> {
    let room = RoomId::new(required(query.room, "room")?);
    let subscription = state.broadcaster.connect(room).await?;

    info!(
        room = %subscription.room(),
        client_id = %subscription.client_id(),
        "SSE client connected"
    );

    let events = subscription.map(|event| Event::default().json_data(event));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
