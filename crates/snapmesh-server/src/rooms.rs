//! Live room state and per-room push channels.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use snapmesh_shared::protocol::RoomEvent;
use snapmesh_shared::{Peer, Room, RoomId};

use crate::error::ServerError;

const PUSH_CAPACITY: usize = 256;

struct RoomEntry {
    room: Room,
    tx: broadcast::Sender<RoomEvent>,
}

impl RoomEntry {
    fn new(id: RoomId) -> Self {
        let (tx, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            room: Room::new(id),
            tx,
        }
    }

    fn publish(&self, events: Vec<RoomEvent>) {
        for event in events {
            // Rooms without subscribers are fine.
            let _ = self.tx.send(event);
        }
    }
}

/// Every live room, keyed by identifier.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, RoomEntry>>>,
    max_rooms: usize,
}

impl RoomRegistry {
    pub fn new(max_rooms: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            max_rooms,
        }
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    /// Create `id` if needed and add `peer` to it.
    pub async fn create(&self, id: RoomId, peer: Peer) -> Result<Room, ServerError> {
        let mut rooms = self.rooms.write().await;
        if !rooms.contains_key(&id) {
            if self.max_rooms > 0 && rooms.len() >= self.max_rooms {
                return Err(ServerError::TooManyRooms(self.max_rooms));
            }
            info!(room = %id, "room created");
        }
        let entry = rooms
            .entry(id.clone())
            .or_insert_with(|| RoomEntry::new(id));
        let event = entry.room.upsert_peer(peer);
        entry.publish(vec![event]);
        Ok(entry.room.clone())
    }

    /// Add `peer` to an existing room.
    pub async fn join(&self, id: &RoomId, peer: Peer) -> Result<Room, ServerError> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(id)
            .ok_or_else(|| ServerError::RoomNotFound(id.to_string()))?;
        debug!(room = %id, peer = %peer.peer_id.short(), "peer joined");
        let event = entry.room.upsert_peer(peer);
        entry.publish(vec![event]);
        Ok(entry.room.clone())
    }

    pub async fn get(&self, id: &RoomId) -> Result<Room, ServerError> {
        self.rooms
            .read()
            .await
            .get(id)
            .map(|entry| entry.room.clone())
            .ok_or_else(|| ServerError::RoomNotFound(id.to_string()))
    }

    /// Apply `mutate` to room `id` and push the events it returns.
    pub async fn mutate<F>(&self, id: &RoomId, mutate: F) -> Result<usize, ServerError>
    where
        F: FnOnce(&mut Room) -> Result<Vec<RoomEvent>, ServerError>,
    {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(id)
            .ok_or_else(|| ServerError::RoomNotFound(id.to_string()))?;
        let events = mutate(&mut entry.room)?;
        let count = events.len();
        entry.publish(events);
        Ok(count)
    }

    /// Snapshot events for a new session plus the live channel, taken under
    /// one lock so no event falls between them.
    pub async fn subscribe(
        &self,
        id: &RoomId,
    ) -> Result<(Vec<RoomEvent>, broadcast::Receiver<RoomEvent>), ServerError> {
        let rooms = self.rooms.read().await;
        let entry = rooms
            .get(id)
            .ok_or_else(|| ServerError::RoomNotFound(id.to_string()))?;
        Ok((entry.room.snapshot_events(), entry.tx.subscribe()))
    }

    /// Drop every room. Open push streams end.
    pub async fn wipe(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let count = rooms.len();
        rooms.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use snapmesh_shared::protocol::{PeerEvent, PhotoEvent};
    use snapmesh_shared::{PeerId, PhotoRecord};

    use super::*;

    fn peer(id: &str) -> Peer {
        Peer::new(PeerId::from(id), format!("s-{id}"), id)
    }

    #[tokio::test]
    async fn create_is_idempotent_and_limited() {
        let rooms = RoomRegistry::new(1);
        rooms.create(RoomId::from("r1"), peer("a")).await.unwrap();
        let room = rooms.create(RoomId::from("r1"), peer("b")).await.unwrap();
        assert_eq!(room.peers.len(), 2);

        let err = rooms.create(RoomId::from("r2"), peer("a")).await.unwrap_err();
        assert!(matches!(err, ServerError::TooManyRooms(1)));
    }

    #[tokio::test]
    async fn join_requires_room() {
        let rooms = RoomRegistry::new(0);
        let err = rooms.join(&RoomId::from("nope"), peer("a")).await.unwrap_err();
        assert!(matches!(err, ServerError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn subscribers_see_snapshot_then_mutations() {
        let rooms = RoomRegistry::new(0);
        let id = RoomId::from("r1");
        rooms.create(id.clone(), peer("a")).await.unwrap();

        let (snapshot, mut rx) = rooms.subscribe(&id).await.unwrap();
        assert!(matches!(&snapshot[1], RoomEvent::Peers(PeerEvent::All(p)) if p.len() == 1));

        rooms
            .mutate(&id, |room| {
                Ok(room
                    .share_photos(vec![PhotoRecord::new("h1", "a.jpg", "image/jpeg", 1)])
                    .into_iter()
                    .collect())
            })
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), RoomEvent::Photos(PhotoEvent::Add(_))));

        assert_eq!(rooms.wipe().await, 1);
        assert!(rooms.is_empty().await);
    }
}
