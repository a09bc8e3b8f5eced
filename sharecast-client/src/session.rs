//! Peer connection session model

use serde::{Deserialize, Serialize};
use sharecast_core::models::{RoomId, StreamName};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    Publish,
    Subscribe,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => f.write_str("publish"),
            Self::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Orchestrator-level lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Recovering,
    Closed,
}

impl SessionState {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE transport state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// A stream on the relay, addressed the way the gateway's `/whip` and `/whep` expect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTarget {
    pub room: RoomId,
    pub stream: StreamName,
}

impl StreamTarget {
    pub fn new(room: impl Into<RoomId>, stream: impl Into<StreamName>) -> Self {
        Self {
            room: room.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room, self.stream)
    }
}

/// At most one live session exists per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub target: StreamTarget,
    pub role: SessionRole,
}

impl SessionKey {
    #[must_use]
    pub const fn new(target: StreamTarget, role: SessionRole) -> Self {
        Self { target, role }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.target)
    }
}

/// Snapshot of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnectionSession {
    pub key: SessionKey,
    pub state: SessionState,
    pub connection_state: ConnectionState,
    pub ice_state: IceState,
    pub retry_count: u32,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Stopped,
    NegotiationFailed(String),
    RestartFailed,
    DisconnectTimeout,
    ConnectTimeout,
    TransportClosed,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::NegotiationFailed(e) => write!(f, "negotiation failed: {e}"),
            Self::RestartFailed => f.write_str("ICE restart did not recover the connection"),
            Self::DisconnectTimeout => f.write_str("disconnected longer than the grace period"),
            Self::ConnectTimeout => f.write_str("connection not established in time"),
            Self::TransportClosed => f.write_str("peer connection closed"),
            Self::Shutdown => f.write_str("orchestrator shut down"),
        }
    }
}
