//! Room grouping and change detection for relay stream lists.

use indexmap::IndexMap;
use sharecast_core::models::{RoomId, StreamInfo};
use tracing::debug;

/// A room whose stream list changed since the previous tick.
/// An empty `streams` means the room has no streams left.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomChange {
    pub room: RoomId,
    pub streams: Vec<StreamInfo>,
}

/// Group streams by `app`, keeping relay order inside each room.
///
/// A repeated stream name within one room keeps only its first occurrence.
#[must_use]
pub fn group_by_room(streams: Vec<StreamInfo>) -> IndexMap<RoomId, Vec<StreamInfo>> {
    let mut rooms: IndexMap<RoomId, Vec<StreamInfo>> = IndexMap::new();
    for stream in streams {
        let room = rooms.entry(RoomId::from(stream.app.as_str())).or_default();
        if room.iter().any(|s| s.name == stream.name) {
            debug!(app = %stream.app, name = %stream.name, "Duplicate stream name in relay listing, skipped");
            continue;
        }
        room.push(stream);
    }
    rooms
}

/// Positional comparison on name and publish state.
///
/// Lists holding the same streams in a different order count as changed.
#[must_use]
pub fn has_changed(previous: &[StreamInfo], current: &[StreamInfo]) -> bool {
    previous.len() != current.len()
        || previous.iter().zip(current).any(|(old, new)| {
            old.name != new.name || old.publish.active != new.publish.active
        })
}
