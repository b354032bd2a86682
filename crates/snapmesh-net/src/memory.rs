//! In-process room server.
//!
//! Applies the same room mutations as the coordination server to rooms held
//! in memory and fans the resulting events out to subscribers. Every call is
//! recorded so callers can assert on what was sent. Used for offline runs
//! and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::debug;

use snapmesh_shared::protocol::{ClearConnectionsRequest, OwnerChange, RoomEvent};
use snapmesh_shared::{Connection, Peer, PeerId, PeerUpdate, PhotoRecord, Room, RoomId};

use crate::api::{PushStream, RoomApi};
use crate::error::NetError;

const PUSH_CAPACITY: usize = 256;

/// One recorded call against the room surface.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomCall {
    CreateRoom(RoomId),
    JoinRoom(RoomId),
    FetchRoom(RoomId),
    UpdatePeer(PeerUpdate),
    LeaveRoom(PeerId),
    SharePhotos(Vec<PhotoRecord>),
    UpdatePhotos(Vec<PhotoRecord>),
    DeletePhoto(String),
    AddOwners(Vec<OwnerChange>),
    UpdateOwners(Vec<OwnerChange>),
    RemoveOwners(Vec<OwnerChange>),
    ReportConnection(Connection),
    ClearConnections(ClearConnectionsRequest),
    Subscribe(String),
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<RoomId, Room>,
    channels: HashMap<RoomId, broadcast::Sender<RoomEvent>>,
    calls: Vec<RoomCall>,
    offline: bool,
    fail_shares: bool,
    fail_deletes: bool,
}

#[derive(Default)]
pub struct MemoryRoom {
    inner: Mutex<Inner>,
}

impl MemoryRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// A room server that already holds `room`.
    pub fn with_room(room: Room) -> Self {
        let this = Self::new();
        this.lock().rooms.insert(room.id.clone(), room);
        this
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RoomCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current server-side copy of a room.
    pub fn room(&self, room_id: &RoomId) -> Option<Room> {
        self.lock().rooms.get(room_id).cloned()
    }

    /// Replace a room's state without emitting events, as if changes
    /// happened while this peer was not listening.
    pub fn set_room(&self, room: Room) {
        self.lock().rooms.insert(room.id.clone(), room);
    }

    /// Make every call fail as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn fail_shares(&self, fail: bool) {
        self.lock().fail_shares = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    fn check(&self, call: RoomCall) -> Result<MutexGuard<'_, Inner>, NetError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.offline {
            return Err(offline());
        }
        Ok(inner)
    }

    /// Record `call`, then run `mutate` on the room and broadcast its events.
    fn mutate<F>(&self, room_id: &RoomId, call: RoomCall, mutate: F) -> Result<(), NetError>
    where
        F: FnOnce(&mut Room) -> Vec<RoomEvent>,
    {
        let mut inner = self.check(call)?;
        inner.apply(room_id, mutate)
    }
}

impl Inner {
    fn apply<F>(&mut self, room_id: &RoomId, mutate: F) -> Result<(), NetError>
    where
        F: FnOnce(&mut Room) -> Vec<RoomEvent>,
    {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| NetError::RoomNotFound(room_id.to_string()))?;
        let events = mutate(room);

        if let Some(tx) = self.channels.get(room_id) {
            for event in events {
                // No receivers is fine.
                let _ = tx.send(event);
            }
        }
        Ok(())
    }
}

fn offline() -> NetError {
    NetError::Status {
        status: 503,
        body: "room server offline".to_string(),
    }
}

#[async_trait]
impl RoomApi for MemoryRoom {
    async fn create_room(&self, room_id: &RoomId, peer: &Peer) -> Result<Room, NetError> {
        let mut inner = self.check(RoomCall::CreateRoom(room_id.clone()))?;
        inner
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone()));
        inner.apply(room_id, |room| vec![room.upsert_peer(peer.clone())])?;
        inner
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| NetError::RoomNotFound(room_id.to_string()))
    }

    async fn join_room(&self, room_id: &RoomId, peer: &Peer) -> Result<Room, NetError> {
        let mut inner = self.check(RoomCall::JoinRoom(room_id.clone()))?;
        inner.apply(room_id, |room| vec![room.upsert_peer(peer.clone())])?;
        inner
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| NetError::RoomNotFound(room_id.to_string()))
    }

    async fn fetch_room(&self, room_id: &RoomId) -> Result<Room, NetError> {
        let inner = self.check(RoomCall::FetchRoom(room_id.clone()))?;
        inner
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| NetError::RoomNotFound(room_id.to_string()))
    }

    async fn update_peer(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        update: &PeerUpdate,
    ) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::UpdatePeer(update.clone()), |room| {
            room.update_peer(peer_id, update).into_iter().collect()
        })
    }

    async fn leave_room(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::LeaveRoom(peer_id.clone()), |room| {
            room.remove_peer(peer_id)
        })
    }

    async fn share_photos(&self, room_id: &RoomId, photos: &[PhotoRecord]) -> Result<(), NetError> {
        let mut inner = self.check(RoomCall::SharePhotos(photos.to_vec()))?;
        if inner.fail_shares {
            return Err(NetError::Status {
                status: 500,
                body: "share rejected".to_string(),
            });
        }
        inner.apply(room_id, |room| {
            room.share_photos(photos.to_vec()).into_iter().collect()
        })
    }

    async fn update_photos(&self, room_id: &RoomId, photos: &[PhotoRecord]) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::UpdatePhotos(photos.to_vec()), |room| {
            room.update_photos(photos.to_vec()).into_iter().collect()
        })
    }

    async fn delete_photo(&self, room_id: &RoomId, info_hash: &str) -> Result<(), NetError> {
        let mut inner = self.check(RoomCall::DeletePhoto(info_hash.to_string()))?;
        if inner.fail_deletes {
            return Err(offline());
        }
        inner.apply(room_id, |room| room.delete_photo(info_hash))
    }

    async fn add_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::AddOwners(owners.to_vec()), |room| {
            room.add_owners(owners)
        })
    }

    async fn update_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::UpdateOwners(owners.to_vec()), |room| {
            room.update_owners(owners)
        })
    }

    async fn remove_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::RemoveOwners(owners.to_vec()), |room| {
            room.remove_owners(owners)
        })
    }

    async fn report_connection(&self, room_id: &RoomId, connection: &Connection) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::ReportConnection(connection.clone()), |room| {
            vec![room.report_connection(connection.clone())]
        })
    }

    async fn clear_connections(
        &self,
        room_id: &RoomId,
        filter: &ClearConnectionsRequest,
    ) -> Result<(), NetError> {
        self.mutate(room_id, RoomCall::ClearConnections(filter.clone()), |room| {
            room.clear_connections(filter).into_iter().collect()
        })
    }

    async fn subscribe(&self, room_id: &RoomId, session_id: &str) -> Result<PushStream, NetError> {
        let mut inner = self.check(RoomCall::Subscribe(session_id.to_string()))?;
        let snapshot = inner
            .rooms
            .get(room_id)
            .map(Room::snapshot_events)
            .ok_or_else(|| NetError::RoomNotFound(room_id.to_string()))?;

        let rx = inner
            .channels
            .entry(room_id.clone())
            .or_insert_with(|| broadcast::channel(PUSH_CAPACITY).0)
            .subscribe();
        debug!(room = %room_id, session = %session_id, "in-process push stream opened");

        let initial = futures::stream::iter(snapshot.into_iter().map(Ok));
        let live = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "in-process push subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(initial.chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapmesh_shared::protocol::PhotoEvent;

    fn alice() -> Peer {
        Peer::new(PeerId::from("a"), "s1", "alice")
    }

    #[tokio::test]
    async fn join_requires_existing_room() {
        let server = MemoryRoom::new();
        let err = server.join_room(&RoomId::from("nope"), &alice()).await.unwrap_err();
        assert!(matches!(err, NetError::RoomNotFound(_)));

        server.create_room(&RoomId::from("r1"), &alice()).await.unwrap();
        let bob = Peer::new(PeerId::from("b"), "s2", "bob");
        let room = server.join_room(&RoomId::from("r1"), &bob).await.unwrap();
        assert_eq!(room.peers.len(), 2);
        assert_eq!(
            server.calls(),
            vec![
                RoomCall::JoinRoom(RoomId::from("nope")),
                RoomCall::CreateRoom(RoomId::from("r1")),
                RoomCall::JoinRoom(RoomId::from("r1")),
            ]
        );
    }

    #[tokio::test]
    async fn subscribers_get_snapshot_then_live_events() {
        let server = MemoryRoom::new();
        let room_id = RoomId::from("r1");
        server.create_room(&room_id, &alice()).await.unwrap();

        let mut stream = server.subscribe(&room_id, "s1").await.unwrap();
        for _ in 0..3 {
            stream.next().await.unwrap().unwrap();
        }

        server
            .share_photos(&room_id, &[PhotoRecord::new("h1", "a.jpg", "image/jpeg", 1)])
            .await
            .unwrap();
        match stream.next().await.unwrap().unwrap() {
            RoomEvent::Photos(PhotoEvent::Add(photos)) => assert_eq!(photos[0].info_hash, "h1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_server_records_but_fails() {
        let server = MemoryRoom::new();
        server.set_offline(true);
        assert!(server.fetch_room(&RoomId::from("r1")).await.is_err());
        assert_eq!(server.calls().len(), 1);
    }
}
