//! Keeps the local user listed in a room's presence

use std::time::Duration;

use serde::Deserialize;
use sharecast_core::models::{Identity, RoomId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ClientError, Result};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Join,
    Leave,
}

impl Action {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

/// Response of `GET /presence`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomPresence {
    pub room: RoomId,
    pub participants: Vec<Identity>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct PresenceHeartbeat {
    http: reqwest::Client,
    url: Url,
    room: RoomId,
    identity: Identity,
    interval: Duration,
}

impl PresenceHeartbeat {
    pub fn new(gateway_url: &str, room: RoomId, identity: Identity) -> Result<Self> {
        let mut url = Url::parse(gateway_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{gateway_url}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(gateway_url.to_string()))?
            .pop_if_empty()
            .push("presence");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url,
            room,
            identity,
            interval: DEFAULT_INTERVAL,
        })
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Join now and every interval; leave once `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.send(Action::Join).await {
                            warn!(room = %self.room, identity = %self.identity, error = %e, "Presence heartbeat failed");
                        }
                    }
                }
            }

            if let Err(e) = self.send(Action::Leave).await {
                warn!(room = %self.room, identity = %self.identity, error = %e, "Presence leave failed");
            }
        })
    }

    async fn send(&self, action: Action) -> Result<()> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("room", self.room.as_str())
            .append_pair("identity", self.identity.as_str())
            .append_pair("action", action.as_str());

        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("presence returned {status}")));
        }
        debug!(room = %self.room, identity = %self.identity, action = action.as_str(), "Presence sent");
        Ok(())
    }

    /// Current participants of the room
    pub async fn participants(&self) -> Result<RoomPresence> {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("room", self.room.as_str());
        self.http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}
