//! WHIP/WHEP signaling endpoints
//!
//! The request body is the SDP offer. A successful relay answer is returned as
//! `application/sdp`; a relay error comes back with the relay's own status and body.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sharecast_core::models::{RoomId, StreamName};
use sharecast_core::RtcEndpoint;
use sharecast_proxy::{cors::signaling_cors, cors::PREFER_LOW_LATENCY, forward_relay_response};

use crate::http::{
    error::{AppError, AppResult},
    required, AppState,
};

pub fn create_signaling_router() -> Router<AppState> {
    Router::new()
        .route("/whip", post(whip))
        .route("/whep", post(whep))
        .route("/stop", post(stop_stream))
        .layer(signaling_cors())
}

#[derive(Debug, Default, Deserialize)]
pub struct SignalingQuery {
    pub app: Option<String>,
    pub stream: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopQuery {
    pub stream: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

/// Publish a stream
///
/// POST /whip?app={room}&stream={name}
///
/// Header `X-Prefer-Low-Latency: true` turns on SDP rewriting.
pub async fn whip(
    State(state): State<AppState>,
    Query(query): Query<SignalingQuery>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Response> {
    exchange(&state, RtcEndpoint::Whip, query, &headers, &body).await
}

/// Play a stream
///
/// POST /whep?app={room}&stream={name}
pub async fn whep(
    State(state): State<AppState>,
    Query(query): Query<SignalingQuery>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Response> {
    exchange(&state, RtcEndpoint::Whep, query, &headers, &body).await
}

async fn exchange(
    state: &AppState,
    endpoint: RtcEndpoint,
    query: SignalingQuery,
    headers: &HeaderMap,
    offer: &str,
) -> AppResult<Response> {
    let (Some(app), Some(stream)) = (
        query.app.filter(|s| !s.is_empty()),
        query.stream.filter(|s| !s.is_empty()),
    ) else {
        return Err(AppError::bad_request("Missing app or stream parameter"));
    };
    let room = RoomId::new(app);
    let stream = StreamName::new(stream);
    let low_latency = prefers_low_latency(headers);

    let response = match endpoint {
        RtcEndpoint::Whip => state.proxy.publish(&room, &stream, offer, low_latency).await?,
        RtcEndpoint::Whep => state.proxy.subscribe(&room, &stream, offer, low_latency).await?,
    };

    Ok(forward_relay_response(response, "application/sdp"))
}

fn prefers_low_latency(headers: &HeaderMap) -> bool {
    headers
        .get(PREFER_LOW_LATENCY)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// Best-effort stream stop
///
/// POST /stop?stream={name}
///
/// Always answers `{success: true}` once the stream name is present; relay failures
/// are logged only.
pub async fn stop_stream(
    State(state): State<AppState>,
    Query(query): Query<StopQuery>,
) -> AppResult<impl IntoResponse> {
    let stream = required(query.stream, "stream")?;
    let outcome = state.proxy.stop(&stream).await;

    Ok(Json(StopResponse {
        success: true,
        message: outcome.message(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_prefers_low_latency() {
        let mut headers = HeaderMap::new();
        assert!(!prefers_low_latency(&headers));

        headers.insert(PREFER_LOW_LATENCY, HeaderValue::from_static("true"));
        assert!(prefers_low_latency(&headers));

        headers.insert(PREFER_LOW_LATENCY, HeaderValue::from_static("false"));
        assert!(!prefers_low_latency(&headers));
    }
}
