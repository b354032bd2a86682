//! Collaborators shared by the managers of one joined room.

use std::sync::Arc;

use snapmesh_net::{PeerRegistry, RoomApi};
use snapmesh_shared::{Peer, PeerId, RoomId};

use crate::engine::EngineAdapter;
use crate::events::EventBus;
use crate::state::PhotoCollection;
use crate::store::DescriptorStore;

pub struct Session {
    pub room_api: Arc<dyn RoomApi>,
    pub room_id: RoomId,
    pub local_peer: Peer,
    pub engine: EngineAdapter,
    pub store: Arc<dyn DescriptorStore>,
    pub photos: PhotoCollection,
    pub peers: Arc<PeerRegistry>,
    pub bus: EventBus,
}

impl Session {
    pub fn peer_id(&self) -> &PeerId {
        &self.local_peer.peer_id
    }
}
