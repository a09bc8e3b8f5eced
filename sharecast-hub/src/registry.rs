use dashmap::DashMap;
use sharecast_core::models::{ClientId, RoomId, StreamEvent};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Events a channel may have queued before its client is considered stalled
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Message sender for a push channel
pub type EventSender = mpsc::Sender<StreamEvent>;

/// Message receiver handed to the transport (SSE response)
pub type EventReceiver = mpsc::Receiver<StreamEvent>;

/// One registered push channel
#[derive(Debug, Clone)]
pub struct ClientChannel {
    pub client_id: ClientId,
    pub room: RoomId,
    pub last_heartbeat_ack: Instant,
    pub sender: EventSender,
}

/// Routing table from rooms to push channels.
///
/// Sends are fire-and-forget. A failed send means the receiving side is gone or
/// has stopped reading, and the channel is deregistered on the spot.
pub trait ChannelRegistry: Send + Sync {
    /// Register a channel with `greeting` already queued, so nothing broadcast
    /// concurrently can overtake it.
    fn subscribe(
        &self,
        room: RoomId,
        client_id: ClientId,
        greeting: Vec<StreamEvent>,
    ) -> EventReceiver;

    fn unsubscribe(&self, client_id: &ClientId) -> bool;

    /// Deliver to every channel in `room`. Returns how many accepted it.
    fn broadcast(&self, room: &RoomId, event: StreamEvent) -> usize;

    /// Deliver to every channel in every room.
    fn broadcast_all(&self, event: StreamEvent) -> usize;

    fn send_to(&self, client_id: &ClientId, event: StreamEvent) -> bool;

    fn channel_count(&self) -> usize;

    fn room_count(&self) -> usize;

    fn subscriber_count(&self, room: &RoomId) -> usize;
}

/// In-memory registry for a single gateway instance
#[derive(Clone)]
pub struct LocalChannelRegistry {
    /// room -> channels
    rooms: Arc<DashMap<RoomId, Vec<ClientChannel>>>,

    /// client -> room, for cleanup and direct sends
    clients: Arc<DashMap<ClientId, RoomId>>,

    capacity: usize,
}

impl Default for LocalChannelRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl LocalChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A client with `capacity` undelivered events is dropped on the next send
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::default(),
            clients: Arc::default(),
            capacity: capacity.max(1),
        }
    }

    fn send_in_room(&self, room: &RoomId, event: &StreamEvent, failed: &mut Vec<ClientId>) -> usize {
        let mut sent_count = 0;
        if let Some(mut channels) = self.rooms.get_mut(room) {
            for channel in channels.iter_mut() {
                match channel.sender.try_send(event.clone()) {
                    Ok(()) => {
                        sent_count += 1;
                        if matches!(event, StreamEvent::Heartbeat) {
                            channel.last_heartbeat_ack = Instant::now();
                        }
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            room = %room,
                            client_id = %channel.client_id,
                            event_type = event.event_type(),
                            capacity = self.capacity,
                            "Push channel is full, dropping stalled client"
                        );
                        failed.push(channel.client_id.clone());
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(
                            room = %room,
                            client_id = %channel.client_id,
                            event_type = event.event_type(),
                            "Push channel closed, marking channel for cleanup"
                        );
                        failed.push(channel.client_id.clone());
                    }
                }
            }
        }
        sent_count
    }
}

impl ChannelRegistry for LocalChannelRegistry {
    fn subscribe(
        &self,
        room: RoomId,
        client_id: ClientId,
        greeting: Vec<StreamEvent>,
    ) -> EventReceiver {
        let (tx, rx) = mpsc::channel(self.capacity.max(greeting.len()));
        for event in greeting {
            // Nothing else holds the sender yet and the queue fits the greeting
            let _ = tx.try_send(event);
        }

        let channel = ClientChannel {
            client_id: client_id.clone(),
            room: room.clone(),
            last_heartbeat_ack: Instant::now(),
            sender: tx,
        };

        self.rooms.entry(room.clone()).or_default().push(channel);
        self.clients.insert(client_id.clone(), room.clone());

        info!(room = %room, client_id = %client_id, "Push channel registered");

        rx
    }

    fn unsubscribe(&self, client_id: &ClientId) -> bool {
        let Some((_, room)) = self.clients.remove(client_id) else {
            debug!(client_id = %client_id, "Push channel already removed");
            return false;
        };

        if let Some(mut channels) = self.rooms.get_mut(&room) {
            channels.retain(|c| &c.client_id != client_id);
            if channels.is_empty() {
                drop(channels);
                self.rooms.remove_if(&room, |_, channels| channels.is_empty());
                debug!(room = %room, "Room has no more channels, removed");
            }
        }

        info!(room = %room, client_id = %client_id, "Push channel removed");
        true
    }

    fn broadcast(&self, room: &RoomId, event: StreamEvent) -> usize {
        let mut failed = Vec::new();
        let sent_count = self.send_in_room(room, &event, &mut failed);

        for client_id in &failed {
            self.unsubscribe(client_id);
        }

        if sent_count > 0 {
            debug!(
                room = %room,
                sent_count,
                event_type = event.event_type(),
                "Event broadcast complete"
            );
        }

        sent_count
    }

    fn broadcast_all(&self, event: StreamEvent) -> usize {
        let rooms: Vec<RoomId> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        let mut failed = Vec::new();
        let sent_count = rooms
            .iter()
            .map(|room| self.send_in_room(room, &event, &mut failed))
            .sum();

        for client_id in &failed {
            self.unsubscribe(client_id);
        }

        sent_count
    }

    fn send_to(&self, client_id: &ClientId, event: StreamEvent) -> bool {
        let Some(room) = self.clients.get(client_id).map(|r| r.value().clone()) else {
            return false;
        };

        let delivered = self.rooms.get(&room).is_some_and(|channels| {
            channels
                .iter()
                .find(|c| &c.client_id == client_id)
                .is_some_and(|c| c.sender.try_send(event.clone()).is_ok())
        });

        if !delivered {
            warn!(room = %room, client_id = %client_id, event_type = event.event_type(), "Direct push failed");
            self.unsubscribe(client_id);
        }
        delivered
    }

    fn channel_count(&self) -> usize {
        self.clients.len()
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn subscriber_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, |channels| channels.len())
    }
}
