use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use sharecast_core::models::{ClientId, RoomId, StreamEvent, StreamInfo};
use sharecast_core::Result;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::{ChannelRegistry, EventReceiver};
use crate::snapshot::SnapshotStore;

/// Fans stream changes out to the push channels of the affected room.
pub struct StreamBroadcaster {
    registry: Arc<dyn ChannelRegistry>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl StreamBroadcaster {
    pub fn new(registry: Arc<dyn ChannelRegistry>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            registry,
            snapshots,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<dyn ChannelRegistry> {
        &self.registry
    }

    /// Register a channel for `room`.
    ///
    /// The first event is always `connected`. If the room already has streams, a
    /// `streams_update` with the current snapshot follows, so the client does not wait
    /// for the next change.
    pub async fn connect(&self, room: RoomId) -> Result<ChannelSubscription> {
        let client_id = ClientId::generate(&room);
        let snapshot = self.snapshots.get(&room).await?.unwrap_or_default();

        let mut greeting = vec![StreamEvent::Connected {
            client_id: client_id.clone(),
            room_name: room.clone(),
        }];
        if !snapshot.is_empty() {
            debug!(room = %room, client_id = %client_id, streams = snapshot.len(), "Replaying current streams");
            greeting.push(StreamEvent::StreamsUpdate {
                room_name: room.clone(),
                streams: snapshot,
            });
        }

        let receiver = self
            .registry
            .subscribe(room.clone(), client_id.clone(), greeting);
        Ok(ChannelSubscription {
            client_id,
            room,
            receiver,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Push a `streams_update` to every channel in `room`.
    pub fn publish(&self, room: &RoomId, streams: Vec<StreamInfo>) -> usize {
        self.registry.broadcast(
            room,
            StreamEvent::StreamsUpdate {
                room_name: room.clone(),
                streams,
            },
        )
    }

    /// Write a heartbeat to every channel. Channels that fail the write are dropped.
    pub fn heartbeat(&self) -> usize {
        let before = self.registry.channel_count();
        let delivered = self.registry.broadcast_all(StreamEvent::Heartbeat);
        let removed = before.saturating_sub(self.registry.channel_count());
        if removed > 0 {
            info!(removed, delivered, "Heartbeat sweep removed dead channels");
        } else {
            debug!(delivered, "Heartbeat sweep complete");
        }
        delivered
    }

    /// Run the heartbeat sweep until `cancel_token` fires.
    pub fn start_heartbeat(
        self: Arc<Self>,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("Heartbeat sweep shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        self.heartbeat();
                    }
                }
            }
        })
    }
}

/// Receiving end of a push channel. Deregisters itself when dropped.
pub struct ChannelSubscription {
    client_id: ClientId,
    room: RoomId,
    receiver: EventReceiver,
    registry: Arc<dyn ChannelRegistry>,
}

impl ChannelSubscription {
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    #[must_use]
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

impl Stream for ChannelSubscription {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.client_id);
    }
}
