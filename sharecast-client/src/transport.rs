//! Peer transport seam
//!
//! The orchestrator never talks to a WebRTC stack directly. It drives a
//! [`PeerTransport`] created by a [`PeerFactory`] and receives the
//! transport's callbacks as [`TransportEvent`]s.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::session::{ConnectionState, IceState, SessionRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    RecvOnly,
    SendOnly,
}

impl From<SessionRole> for Direction {
    fn from(role: SessionRole) -> Self {
        match role {
            SessionRole::Publish => Self::SendOnly,
            SessionRole::Subscribe => Self::RecvOnly,
        }
    }
}

/// Callback raised by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionState(ConnectionState),
    IceState(IceState),
    Track { kind: MediaKind, track_id: String },
}

/// Where a transport reports its callbacks
///
/// Cloned into every callback the transport registers; all events end up on
/// the orchestrator's queue.
#[derive(Clone)]
pub struct TransportEvents {
    sink: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportEvents {
    pub fn new(sink: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.sink)(event);
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_transceiver(&self, kind: MediaKind, direction: Direction) -> Result<()>;

    /// Create the local offer and return its SDP once candidates are gathered
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    async fn apply_answer(&self, sdp: String) -> Result<()>;

    /// Stop every local and remote media track
    async fn stop_tracks(&self) -> Result<()>;

    /// Close the underlying connection
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        role: SessionRole,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>>;
}

/// Owns a transport for the lifetime of a session.
///
/// [`release`](Self::release) stops the tracks and closes the connection and
/// completes once both are done. A guard dropped without being released can
/// only schedule that work on the current runtime.
pub struct TransportGuard {
    transport: Arc<dyn PeerTransport>,
    released: bool,
}

impl TransportGuard {
    #[must_use]
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            transport,
            released: false,
        }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub async fn release(mut self) {
        self.released = true;
        shut_down(self.transport.as_ref()).await;
    }
}

async fn shut_down(transport: &dyn PeerTransport) {
    if let Err(e) = transport.stop_tracks().await {
        warn!(error = %e, "Failed to stop tracks");
    }
    if let Err(e) = transport.close().await {
        warn!(error = %e, "Failed to close peer connection");
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let transport = Arc::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shut_down(transport.as_ref()).await });
            }
            Err(_) => warn!("Transport dropped outside a runtime, connection left open"),
        }
    }
}
