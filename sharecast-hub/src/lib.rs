//! Presence tracking and stream change fan-out for the signaling gateway.
//!
//! # Architecture
//!
//! ```text
//! relay ──poll──> StreamPoller ──diff──> SnapshotStore
//!                      │
//!                      └──> StreamBroadcaster ──> ChannelRegistry ──> SSE clients
//! ```
//!
//! Presence is independent of streams. The two views are only combined by clients.

pub mod broadcaster;
pub mod differ;
pub mod poller;
pub mod presence;
pub mod registry;
pub mod snapshot;

pub use broadcaster::{ChannelSubscription, StreamBroadcaster};
pub use differ::{group_by_room, has_changed, RoomChange};
pub use poller::StreamPoller;
pub use presence::{InMemoryPresenceStore, PresenceStore};
pub use registry::{ChannelRegistry, LocalChannelRegistry};
pub use snapshot::{InMemorySnapshotStore, SnapshotStore};
