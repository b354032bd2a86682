//! Room peer and wire-connection bookkeeping.
//!
//! Holds the room's peer list and the peer-to-peer connection graph, both
//! fed by push events. Each collection is swapped wholesale on update so
//! readers always see a consistent snapshot without holding a lock. Updates
//! build the next snapshot while holding the write guard.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use snapmesh_shared::protocol::{ClearConnectionsRequest, PeerEvent};
use snapmesh_shared::{Connection, Peer, PeerId, RoomId};

use crate::api::RoomApi;

/// One live engine wire to a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireInfo {
    /// The room peer on the far side of the wire.
    pub peer_id: PeerId,
    /// Transport name, e.g. `webrtc` or `tcp`.
    pub transport: String,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

impl WireInfo {
    /// Connection record for this wire, seen from `local_peer_id`.
    ///
    /// `None` when the underlying socket has not exposed both addresses yet.
    pub fn to_connection(&self, info_hash: &str, local_peer_id: &PeerId) -> Option<Connection> {
        let local = self.local_addr?;
        let remote = self.remote_addr?;
        Some(Connection {
            from_peer_id: local_peer_id.clone(),
            to_peer_id: self.peer_id.clone(),
            info_hash: info_hash.to_string(),
            connection_type: self.transport.clone(),
            from: local.ip().to_string(),
            from_port: local.port(),
            to: remote.ip().to_string(),
            to_port: remote.port(),
        })
    }
}

/// Anything that can enumerate the live wires of one transfer.
pub trait WireSource {
    /// Engine identifier of the transfer, once minted.
    fn info_hash(&self) -> Option<String>;
    fn wires(&self) -> Vec<WireInfo>;
}

pub struct PeerRegistry {
    room_api: Arc<dyn RoomApi>,
    room_id: RoomId,
    peers: RwLock<Arc<Vec<Peer>>>,
    connections: RwLock<Arc<Vec<Connection>>>,
}

impl PeerRegistry {
    pub fn new(room_api: Arc<dyn RoomApi>, room_id: RoomId) -> Self {
        Self {
            room_api,
            room_id,
            peers: RwLock::new(Arc::new(Vec::new())),
            connections: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn peers(&self) -> Arc<Vec<Peer>> {
        match self.peers.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn connections(&self) -> Arc<Vec<Connection>> {
        match self.connections.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<Peer> {
        self.peers().iter().find(|p| &p.peer_id == peer_id).cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.peers().len()
    }

    pub fn set_peers(&self, peers: Vec<Peer>) {
        self.replace_peers(Arc::new(peers));
    }

    /// Apply a `peers` push event.
    pub fn apply(&self, event: &PeerEvent) {
        self.modify_peers(|current| match event {
            PeerEvent::All(peers) => peers.clone(),
            PeerEvent::Add(peer) | PeerEvent::Update(peer) => {
                let mut next: Vec<Peer> = current
                    .iter()
                    .filter(|p| p.peer_id != peer.peer_id)
                    .cloned()
                    .collect();
                match current.iter().position(|p| p.peer_id == peer.peer_id) {
                    Some(index) => next.insert(index, peer.clone()),
                    None => next.push(peer.clone()),
                }
                next
            }
            PeerEvent::Delete(peer_id) => {
                debug!(peer = %peer_id.short(), "peer left room");
                current
                    .iter()
                    .filter(|p| &p.peer_id != peer_id)
                    .cloned()
                    .collect()
            }
        });
    }

    /// Full replace from a `peerConnections` push event.
    pub fn replace_connections(&self, connections: Vec<Connection>) {
        self.store_connections(Arc::new(connections));
    }

    /// Report every live wire of `transfer` to the room server.
    ///
    /// Returns how many connections were reported. Wires whose addresses are
    /// unknown, and links already known with the same addresses, are skipped.
    pub fn connect(&self, transfer: &dyn WireSource, local_peer_id: &PeerId) -> usize {
        let Some(info_hash) = transfer.info_hash() else {
            return 0;
        };
        transfer
            .wires()
            .iter()
            .filter(|wire| self.report_wire(&info_hash, local_peer_id, wire))
            .count()
    }

    /// Report a single wire. Fire and forget; returns whether a report was sent.
    pub fn report_wire(&self, info_hash: &str, local_peer_id: &PeerId, wire: &WireInfo) -> bool {
        let Some(connection) = wire.to_connection(info_hash, local_peer_id) else {
            debug!(info_hash = %info_hash, peer = %wire.peer_id.short(), "wire has no socket addresses yet");
            return false;
        };

        let added = self.modify_connections(|current| {
            if current.iter().any(|c| c == &connection) {
                return None;
            }
            let mut next: Vec<Connection> = current
                .iter()
                .filter(|c| !c.same_link(&connection))
                .cloned()
                .collect();
            next.push(connection.clone());
            Some(next)
        });
        if !added {
            return false;
        }

        let api = Arc::clone(&self.room_api);
        let room_id = self.room_id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.report_connection(&room_id, &connection).await {
                warn!(
                    info_hash = %connection.info_hash,
                    to = %connection.to_peer_id.short(),
                    error = %e,
                    "failed to report connection"
                );
            }
        });
        true
    }

    /// Forget every connection of a deleted item, locally and on the server.
    pub fn disconnect(&self, info_hash: &str) {
        let filter = ClearConnectionsRequest {
            from_peer_id: None,
            info_hash: Some(info_hash.to_string()),
        };

        self.modify_connections(|current| {
            Some(current.iter().filter(|c| !filter.matches(c)).cloned().collect())
        });

        let api = Arc::clone(&self.room_api);
        let room_id = self.room_id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.clear_connections(&room_id, &filter).await {
                warn!(info_hash = ?filter.info_hash, error = %e, "failed to clear connections");
            }
        });
    }

    fn replace_peers(&self, next: Arc<Vec<Peer>>) {
        match self.peers.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    fn modify_peers<F>(&self, f: F)
    where
        F: FnOnce(&[Peer]) -> Vec<Peer>,
    {
        let mut guard = match self.peers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = f(guard.as_slice());
        *guard = Arc::new(next);
    }

    fn store_connections(&self, next: Arc<Vec<Connection>>) {
        match self.connections.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Swap in the snapshot `f` builds from the current one. `f` returns
    /// `None` to leave it as is; the result says whether it was replaced.
    fn modify_connections<F>(&self, f: F) -> bool
    where
        F: FnOnce(&[Connection]) -> Option<Vec<Connection>>,
    {
        let mut guard = match self.connections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match f(guard.as_slice()) {
            Some(next) => {
                *guard = Arc::new(next);
                true
            }
            None => false,
        }
    }
}
