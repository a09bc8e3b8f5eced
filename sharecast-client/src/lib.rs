//! Client side of sharecast
//!
//! - [`Orchestrator`] owns the peer connection sessions for watching remote
//!   streams and publishing the local one.
//! - [`StreamFeed`] follows a room's stream list over SSE.
//! - [`PresenceHeartbeat`] keeps the local user listed in a room.
//!
//! The orchestrator reaches WebRTC only through [`PeerFactory`]; use
//! [`WebRtcPeerFactory`] for a webrtc-rs backed client.

pub mod error;
pub mod feed;
pub mod orchestrator;
pub mod presence;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod transport;

pub use error::{ClientError, NegotiationError, Result};
pub use feed::{FeedState, StreamFeed};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorEvent, OrchestratorHandle};
pub use presence::{PresenceHeartbeat, RoomPresence};
pub use rtc::{IceServerConfig, WebRtcPeerFactory, WebRtcTransport};
pub use session::{
    CloseReason, ConnectionState, IceState, PeerConnectionSession, SessionKey, SessionRole,
    SessionState, StreamTarget,
};
pub use signaling::{HttpSignalingClient, SignalingClient};
pub use transport::{Direction, MediaKind, PeerFactory, PeerTransport, TransportEvent, TransportEvents};
