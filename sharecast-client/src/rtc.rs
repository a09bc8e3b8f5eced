//! webrtc-rs backed peer transport

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{ClientError, Result};
use crate::session::{ConnectionState, IceState, SessionRole};
use crate::transport::{
    Direction, MediaKind, PeerFactory, PeerTransport, TransportEvent, TransportEvents,
};

const GATHER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        }
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => Self::New,
        }
    }
}

impl From<RTCIceConnectionState> for IceState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => Self::Checking,
            RTCIceConnectionState::Connected => Self::Connected,
            RTCIceConnectionState::Completed => Self::Completed,
            RTCIceConnectionState::Disconnected => Self::Disconnected,
            RTCIceConnectionState::Failed => Self::Failed,
            RTCIceConnectionState::Closed => Self::Closed,
            RTCIceConnectionState::New | RTCIceConnectionState::Unspecified => Self::New,
        }
    }
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

impl From<MediaKind> for RTPCodecType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::Audio,
            MediaKind::Video => Self::Video,
        }
    }
}

type TrackHandler = Arc<dyn Fn(Arc<TrackRemote>) + Send + Sync>;

/// Creates webrtc-rs peer connections for headless clients
#[derive(Clone, Default)]
pub struct WebRtcPeerFactory {
    ice_servers: Vec<IceServerConfig>,
    local_tracks: HashMap<MediaKind, Arc<TrackLocalStaticSample>>,
    on_track: Option<TrackHandler>,
}

impl WebRtcPeerFactory {
    #[must_use]
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self {
            ice_servers,
            ..Self::default()
        }
    }

    /// Track sent on publish sessions for `kind`. Without one, a send-only
    /// transceiver is negotiated with nothing attached.
    #[must_use]
    pub fn with_local_track(mut self, kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> Self {
        self.local_tracks.insert(kind, track);
        self
    }

    /// Called for every remote track on subscribe sessions
    #[must_use]
    pub fn with_track_handler(
        mut self,
        handler: impl Fn(Arc<TrackRemote>) + Send + Sync + 'static,
    ) -> Self {
        self.on_track = Some(Arc::new(handler));
        self
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        role: SessionRole,
        events: TransportEvents,
    ) -> Result<Arc<dyn PeerTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(%state, "Peer connection state changed");
            state_events.emit(TransportEvent::ConnectionState(state.into()));
            Box::pin(async {})
        }));

        let ice_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            debug!(%state, "ICE connection state changed");
            ice_events.emit(TransportEvent::IceState(state.into()));
            Box::pin(async {})
        }));

        let on_track = self.on_track.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                events.emit(TransportEvent::Track {
                    kind: track.kind().into(),
                    track_id: track.id(),
                });
                if let Some(handler) = &on_track {
                    handler(track);
                }
                Box::pin(async {})
            },
        ));

        debug!(%role, "Created peer connection");
        Ok(Arc::new(WebRtcTransport {
            pc,
            local_tracks: self.local_tracks.clone(),
        }))
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    local_tracks: HashMap<MediaKind, Arc<TrackLocalStaticSample>>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_transceiver(&self, kind: MediaKind, direction: Direction) -> Result<()> {
        if direction == Direction::SendOnly {
            if let Some(track) = self.local_tracks.get(&kind) {
                self.pc
                    .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                    .await?;
                return Ok(());
            }
        }

        let direction = match direction {
            Direction::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
            Direction::SendOnly => RTCRtpTransceiverDirection::Sendonly,
        };
        self.pc
            .add_transceiver_from_kind(
                kind.into(),
                Some(RTCRtpTransceiverInit {
                    direction,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String> {
        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                ice_restart,
                ..Default::default()
            }))
            .await?;

        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        if tokio::time::timeout(GATHER_TIMEOUT, gathered.recv())
            .await
            .is_err()
        {
            warn!("ICE gathering did not complete, sending partial candidates");
        }

        self.pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or_else(|| ClientError::Transport("no local description".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn stop_tracks(&self) -> Result<()> {
        for transceiver in self.pc.get_transceivers().await {
            transceiver.stop().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        debug!("Peer connection closed");
        Ok(())
    }
}
