use std::sync::Arc;
use std::time::Duration;

use sharecast_core::{Result, StreamSource};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::StreamBroadcaster;
use crate::differ::{group_by_room, has_changed, RoomChange};
use crate::snapshot::SnapshotStore;

/// Polls the relay for its stream list and broadcasts per-room changes.
pub struct StreamPoller {
    source: Arc<dyn StreamSource>,
    snapshots: Arc<dyn SnapshotStore>,
    broadcaster: Arc<StreamBroadcaster>,
}

impl StreamPoller {
    pub fn new(
        source: Arc<dyn StreamSource>,
        snapshots: Arc<dyn SnapshotStore>,
        broadcaster: Arc<StreamBroadcaster>,
    ) -> Self {
        Self {
            source,
            snapshots,
            broadcaster,
        }
    }

    /// Run a single tick: fetch, diff every room against its snapshot, broadcast changes.
    ///
    /// Rooms that vanished from the relay get an empty update and are dropped.
    pub async fn poll_once(&self) -> Result<Vec<RoomChange>> {
        let grouped = group_by_room(self.source.fetch_streams().await?);
        let mut changes = Vec::new();

        for (room, streams) in &grouped {
            let previous = self.snapshots.get(room).await?.unwrap_or_default();
            if has_changed(&previous, streams) {
                self.snapshots.replace(room.clone(), streams.clone()).await?;
                changes.push(RoomChange {
                    room: room.clone(),
                    streams: streams.clone(),
                });
            }
        }

        for room in self.snapshots.rooms().await? {
            if !grouped.contains_key(&room) {
                self.snapshots.remove(&room).await?;
                changes.push(RoomChange {
                    room,
                    streams: Vec::new(),
                });
            }
        }

        for change in &changes {
            let delivered = self.broadcaster.publish(&change.room, change.streams.clone());
            debug!(
                room = %change.room,
                streams = change.streams.len(),
                delivered,
                "Stream list changed"
            );
        }

        Ok(changes)
    }

    /// Poll every `period` until `cancel_token` fires. Failed ticks are logged and
    /// retried on the next tick.
    pub fn start(self: Arc<Self>, period: Duration, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "Stream poller started");

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!("Stream poller shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        if let Err(e) = self.poll_once().await {
                            warn!(error = %e, "Failed to poll relay streams, retrying next tick");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LocalChannelRegistry;
    use crate::snapshot::InMemorySnapshotStore;
    use sharecast_core::models::{RoomId, StreamEvent, StreamInfo};
    use sharecast_core::relay::MockStreamSource;
    use sharecast_core::Error;
    use std::sync::Mutex;

    /// Source that replays a scripted sequence of relay responses
    struct ScriptedSource {
        responses: Mutex<Vec<Result<Vec<StreamInfo>>>>,
    }

    impl ScriptedSource {
        fn new(mut responses: Vec<Result<Vec<StreamInfo>>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait::async_trait]
    impl StreamSource for ScriptedSource {
        async fn fetch_streams(&self) -> Result<Vec<StreamInfo>> {
            self.responses
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn poller_with(source: Arc<dyn StreamSource>) -> (Arc<StreamPoller>, Arc<StreamBroadcaster>) {
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let broadcaster = Arc::new(StreamBroadcaster::new(
            Arc::new(LocalChannelRegistry::new()),
            snapshots.clone(),
        ));
        let poller = Arc::new(StreamPoller::new(source, snapshots, broadcaster.clone()));
        (poller, broadcaster)
    }

    #[tokio::test]
    async fn test_first_poll_emits_every_room() {
        let mut source = MockStreamSource::new();
        source.expect_fetch_streams().times(1).returning(|| {
            Ok(vec![
                StreamInfo::new("demo", "s1", true),
                StreamInfo::new("lobby", "s2", true),
            ])
        });
        let (poller, _) = poller_with(Arc::new(source));

        let changes = poller.poll_once().await.expect("poll");
        let rooms: Vec<&str> = changes.iter().map(|c| c.room.as_str()).collect();
        assert_eq!(rooms, vec!["demo", "lobby"]);
    }

    #[tokio::test]
    async fn test_unchanged_poll_emits_nothing() {
        let streams = vec![StreamInfo::new("demo", "s1", true)];
        let source = ScriptedSource::new(vec![Ok(streams.clone()), Ok(streams)]);
        let (poller, _) = poller_with(Arc::new(source));

        assert_eq!(poller.poll_once().await.expect("poll").len(), 1);
        assert!(poller.poll_once().await.expect("poll").is_empty());
    }

    #[tokio::test]
    async fn test_vanished_room_gets_empty_update() {
        let source = ScriptedSource::new(vec![
            Ok(vec![StreamInfo::new("demo", "s1", true)]),
            Ok(vec![]),
        ]);
        let (poller, broadcaster) = poller_with(Arc::new(source));
        poller.poll_once().await.expect("poll");

        let mut sub = broadcaster.connect(RoomId::from("demo")).await.expect("connect");
        assert!(matches!(sub.recv().await, Some(StreamEvent::Connected { .. })));
        assert!(matches!(sub.recv().await, Some(StreamEvent::StreamsUpdate { ref streams, .. }) if streams.len() == 1));

        let changes = poller.poll_once().await.expect("poll");
        assert_eq!(
            changes,
            vec![RoomChange {
                room: RoomId::from("demo"),
                streams: vec![]
            }]
        );
        assert_eq!(
            sub.recv().await,
            Some(StreamEvent::StreamsUpdate {
                room_name: RoomId::from("demo"),
                streams: vec![]
            })
        );
    }

    #[tokio::test]
    async fn test_fetch_error_keeps_snapshot() {
        let source = ScriptedSource::new(vec![
            Ok(vec![StreamInfo::new("demo", "s1", true)]),
            Err(Error::Relay {
                status: 502,
                body: "bad gateway".to_string(),
            }),
            Ok(vec![StreamInfo::new("demo", "s1", true)]),
        ]);
        let (poller, _) = poller_with(Arc::new(source));

        poller.poll_once().await.expect("poll");
        assert!(poller.poll_once().await.is_err());
        // same list as before the failure: nothing to report
        assert!(poller.poll_once().await.expect("poll").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_survives_errors() {
        let source = ScriptedSource::new(vec![
            Err(Error::Internal("relay down".to_string())),
            Ok(vec![StreamInfo::new("demo", "s1", true)]),
        ]);
        let (poller, broadcaster) = poller_with(Arc::new(source));
        let mut sub = broadcaster.connect(RoomId::from("demo")).await.expect("connect");
        sub.recv().await;

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&poller).start(Duration::from_secs(2), cancel.clone());

        let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("update after retry");
        assert!(matches!(event, Some(StreamEvent::StreamsUpdate { ref streams, .. }) if streams[0].name == "s1"));

        cancel.cancel();
        handle.await.expect("join poller");
    }
}
