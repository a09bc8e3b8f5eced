use serde::{Deserialize, Serialize};

use super::id::{ClientId, RoomId};
use super::stream::StreamInfo;

/// Payload pushed to viewers over `/streams/sse`.
///
/// Serialized as `{"type": "...", ...}` with camelCase field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Connected { client_id: ClientId, room_name: RoomId },

    #[serde(rename_all = "camelCase")]
    StreamsUpdate {
        room_name: RoomId,
        streams: Vec<StreamInfo>,
    },

    Heartbeat,
}

impl StreamEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::StreamsUpdate { .. } => "streams_update",
            Self::Heartbeat => "heartbeat",
        }
    }

    /// Render as a single SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
