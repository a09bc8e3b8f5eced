use async_trait::async_trait;
use dashmap::DashMap;
use sharecast_core::models::{RoomId, StreamInfo};
use sharecast_core::Result;

/// Last known stream list per room, replaced wholesale on every change.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, room: &RoomId) -> Result<Option<Vec<StreamInfo>>>;

    async fn replace(&self, room: RoomId, streams: Vec<StreamInfo>) -> Result<()>;

    async fn remove(&self, room: &RoomId) -> Result<Option<Vec<StreamInfo>>>;

    async fn rooms(&self) -> Result<Vec<RoomId>>;
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    rooms: DashMap<RoomId, Vec<StreamInfo>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, room: &RoomId) -> Result<Option<Vec<StreamInfo>>> {
        Ok(self.rooms.get(room).map(|entry| entry.value().clone()))
    }

    async fn replace(&self, room: RoomId, streams: Vec<StreamInfo>) -> Result<()> {
        self.rooms.insert(room, streams);
        Ok(())
    }

    async fn remove(&self, room: &RoomId) -> Result<Option<Vec<StreamInfo>>> {
        Ok(self.rooms.remove(room).map(|(_, streams)| streams))
    }

    async fn rooms(&self) -> Result<Vec<RoomId>> {
        Ok(self.rooms.iter().map(|entry| entry.key().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_get_remove() {
        let store = InMemorySnapshotStore::new();
        let room = RoomId::from("demo");

        assert!(store.get(&room).await.expect("get").is_none());

        store
            .replace(room.clone(), vec![StreamInfo::new("demo", "s1", true)])
            .await
            .expect("replace");
        store
            .replace(room.clone(), vec![StreamInfo::new("demo", "s2", true)])
            .await
            .expect("replace");

        let current = store.get(&room).await.expect("get").expect("snapshot");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].name, "s2");
        assert_eq!(store.rooms().await.expect("rooms"), vec![room.clone()]);

        assert!(store.remove(&room).await.expect("remove").is_some());
        assert!(store.rooms().await.expect("rooms").is_empty());
    }
}
