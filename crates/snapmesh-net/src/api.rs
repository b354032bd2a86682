//! The coordination-server surface the client core depends on.

use async_trait::async_trait;
use futures::stream::BoxStream;

use snapmesh_shared::protocol::{ClearConnectionsRequest, OwnerChange, RoomEvent};
use snapmesh_shared::{Connection, Peer, PeerId, PeerUpdate, PhotoRecord, Room, RoomId};

use crate::error::NetError;

/// Room push events in server-send order. Undecodable events surface as
/// `Err` items without ending the stream.
pub type PushStream = BoxStream<'static, Result<RoomEvent, NetError>>;

#[async_trait]
pub trait RoomApi: Send + Sync {
    async fn create_room(&self, room_id: &RoomId, peer: &Peer) -> Result<Room, NetError>;
    async fn join_room(&self, room_id: &RoomId, peer: &Peer) -> Result<Room, NetError>;
    async fn fetch_room(&self, room_id: &RoomId) -> Result<Room, NetError>;

    async fn update_peer(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        update: &PeerUpdate,
    ) -> Result<(), NetError>;
    async fn leave_room(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), NetError>;

    async fn share_photos(&self, room_id: &RoomId, photos: &[PhotoRecord]) -> Result<(), NetError>;
    async fn update_photos(&self, room_id: &RoomId, photos: &[PhotoRecord]) -> Result<(), NetError>;
    async fn delete_photo(&self, room_id: &RoomId, info_hash: &str) -> Result<(), NetError>;

    async fn add_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError>;
    async fn update_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError>;
    async fn remove_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError>;

    async fn report_connection(&self, room_id: &RoomId, connection: &Connection) -> Result<(), NetError>;
    async fn clear_connections(
        &self,
        room_id: &RoomId,
        filter: &ClearConnectionsRequest,
    ) -> Result<(), NetError>;

    /// Open the room's push stream for `session_id`.
    async fn subscribe(&self, room_id: &RoomId, session_id: &str) -> Result<PushStream, NetError>;
}
