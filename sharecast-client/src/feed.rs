//! Live stream list for one room, fed by the gateway's `/streams/sse`

use std::time::Duration;

use futures::StreamExt;
use sharecast_core::models::{ClientId, RoomId, StreamEvent, StreamInfo};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{ClientError, Result};

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// What the feed currently knows about its room
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub connected: bool,
    pub client_id: Option<ClientId>,
    pub streams: Vec<StreamInfo>,
}

pub struct StreamFeed {
    http: reqwest::Client,
    url: Url,
    room: RoomId,
    reconnect_delay: Duration,
}

impl StreamFeed {
    pub fn new(gateway_url: &str, room: RoomId) -> Result<Self> {
        let mut url = Url::parse(gateway_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{gateway_url}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(gateway_url.to_string()))?
            .pop_if_empty()
            .extend(["streams", "sse"]);
        url.query_pairs_mut().append_pair("room", room.as_str());

        // No overall timeout; the response body is open-ended
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url,
            room,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }

    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Follow the room until `cancel` fires, reconnecting after every error
    /// or end of stream.
    pub fn spawn(self, cancel: CancellationToken) -> (watch::Receiver<FeedState>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(FeedState::default());
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = self.follow(&tx) => match result {
                        Ok(()) => info!(room = %self.room, "Stream feed ended"),
                        Err(e) => warn!(room = %self.room, error = %e, "Stream feed failed"),
                    },
                }

                tx.send_modify(|state| {
                    state.connected = false;
                    state.client_id = None;
                });

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.reconnect_delay) => {
                        debug!(room = %self.room, "Reconnecting stream feed");
                    }
                }
            }
        });
        (rx, task)
    }

    async fn follow(&self, tx: &watch::Sender<FeedState>) -> Result<()> {
        let response = self
            .http
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("feed returned {status}")));
        }

        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport(e.to_string()))?;
            for data in parser.push(&chunk) {
                self.apply(tx, &data);
            }
        }
        Ok(())
    }

    fn apply(&self, tx: &watch::Sender<FeedState>, data: &str) {
        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                warn!(room = %self.room, error = %e, "Ignoring malformed feed event");
                return;
            }
        };

        match event {
            StreamEvent::Connected { client_id, .. } => {
                info!(room = %self.room, %client_id, "Stream feed connected");
                tx.send_modify(|state| {
                    state.connected = true;
                    state.client_id = Some(client_id);
                });
            }
            StreamEvent::StreamsUpdate { room_name, streams } => {
                if room_name != self.room {
                    debug!(room = %self.room, other = %room_name, "Ignoring update for another room");
                    return;
                }
                debug!(room = %self.room, count = streams.len(), "Stream list updated");
                tx.send_modify(|state| state.streams = streams);
            }
            StreamEvent::Heartbeat => trace!(room = %self.room, "Feed heartbeat"),
        }
    }
}

/// Incremental `text/event-stream` decoder yielding each event's data
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data
                    .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comments (":") and other fields are ignored
        }
        events
    }
}
