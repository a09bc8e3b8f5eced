//! Room presence endpoints
//!
//! Clients announce themselves with `POST /presence?action=join` on a timer and
//! read the room roster with `GET /presence`.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sharecast_core::models::{Identity, RoomId};
use sharecast_proxy::cors::presence_cors;
use tracing::debug;

use crate::http::{error::AppResult, required, AppState};

pub fn create_presence_router() -> Router<AppState> {
    Router::new()
        .route("/presence", get(list_participants).post(update_presence))
        .layer(presence_cors())
}

#[derive(Debug, Default, Deserialize)]
pub struct PresenceQuery {
    pub room: Option<String>,
    pub identity: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Join,
    Leave,
}

impl PresenceAction {
    /// Anything other than `leave` is a join (heartbeat).
    #[must_use]
    pub fn parse(action: Option<&str>) -> Self {
        match action {
            Some(a) if a.eq_ignore_ascii_case("leave") => Self::Leave,
            _ => Self::Join,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub room: RoomId,
    pub participants: Vec<Identity>,
    pub count: usize,
}

/// Join or leave a room
///
/// POST /presence?room={room}&identity={identity}&action=join|leave
pub async fn update_presence(
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> AppResult<impl IntoResponse> {
    let room = RoomId::new(required(query.room, "room")?);
    let identity = Identity::new(required(query.identity, "identity")?);

    match PresenceAction::parse(query.action.as_deref()) {
        PresenceAction::Join => state.presence.join(&room, &identity).await?,
        PresenceAction::Leave => {
            let existed = state.presence.leave(&room, &identity).await?;
            debug!(room = %room, identity = %identity, existed, "Participant left");
        }
    }

    Ok(Json(SuccessResponse { success: true }))
}

/// List identities seen in the last TTL window
///
/// GET /presence?room={room}
///
/// Response: `{room, participants, count}`
pub async fn list_participants(
    State(state): State<AppState>,
    Query(query): Query<PresenceQuery>,
) -> AppResult<impl IntoResponse> {
    let room = RoomId::new(required(query.room, "room")?);
    let participants = state.presence.list_active(&room).await?;

    Ok(Json(PresenceResponse {
        count: participants.len(),
        room,
        participants,
    }))
}
