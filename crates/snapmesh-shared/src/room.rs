//! Authoritative room mutations.
//!
//! Every mutation applies itself to the [`Room`] and returns the push events
//! that describe it, in the order subscribers must see them. The same logic
//! backs the coordination server and the in-process room used offline.

use crate::photo::PhotoRecord;
use crate::protocol::{ClearConnectionsRequest, OwnerChange, PeerEvent, PhotoEvent, RoomEvent};
use crate::types::{Connection, Peer, PeerId, PeerUpdate, Room};

impl Room {
    /// Full-state events sent to a freshly subscribed session.
    pub fn snapshot_events(&self) -> Vec<RoomEvent> {
        vec![
            RoomEvent::Photos(PhotoEvent::All(self.photos.clone())),
            RoomEvent::Peers(PeerEvent::All(self.peers.clone())),
            RoomEvent::Connections(self.connections.clone()),
        ]
    }

    pub fn upsert_peer(&mut self, peer: Peer) -> RoomEvent {
        match self.peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
            Some(existing) => {
                *existing = peer.clone();
                RoomEvent::Peers(PeerEvent::Update(peer))
            }
            None => {
                self.peers.push(peer.clone());
                RoomEvent::Peers(PeerEvent::Add(peer))
            }
        }
    }

    pub fn update_peer(&mut self, peer_id: &PeerId, update: &PeerUpdate) -> Option<RoomEvent> {
        let peer = self.peers.iter_mut().find(|p| &p.peer_id == peer_id)?;
        *peer = peer.apply(update);
        Some(RoomEvent::Peers(PeerEvent::Update(peer.clone())))
    }

    /// Remove a peer together with its ownership entries and connections.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Vec<RoomEvent> {
        let before = self.peers.len();
        self.peers.retain(|p| &p.peer_id != peer_id);
        if self.peers.len() == before {
            return Vec::new();
        }

        let mut events = vec![RoomEvent::Peers(PeerEvent::Delete(peer_id.clone()))];

        for photo in &mut self.photos {
            if let Some(owner) = photo.owner(peer_id) {
                let change = OwnerChange::new(photo.info_hash.clone(), owner);
                *photo = photo.without_owner(peer_id);
                events.push(RoomEvent::Photos(PhotoEvent::RemoveOwner(change)));
            }
        }

        let filter = ClearConnectionsRequest {
            from_peer_id: Some(peer_id.clone()),
            info_hash: None,
        };
        events.extend(self.clear_connections(&filter));
        events
    }

    /// Add items not already present. Returns `None` when nothing was new.
    pub fn share_photos(&mut self, photos: Vec<PhotoRecord>) -> Option<RoomEvent> {
        let mut added: Vec<PhotoRecord> = Vec::new();
        for photo in photos {
            let known = self.photo(&photo.info_hash).is_some()
                || added.iter().any(|p| p.info_hash == photo.info_hash);
            if !known {
                added.push(photo);
            }
        }
        if added.is_empty() {
            return None;
        }
        self.photos.extend(added.iter().cloned());
        Some(RoomEvent::Photos(PhotoEvent::Add(added)))
    }

    /// Replace metadata of known items. Ownership stays server-managed.
    pub fn update_photos(&mut self, photos: Vec<PhotoRecord>) -> Option<RoomEvent> {
        let mut updated = Vec::new();
        for mut photo in photos {
            if let Some(existing) = self.photos.iter_mut().find(|p| p.info_hash == photo.info_hash) {
                photo.owners = existing.owners.clone();
                *existing = photo.clone();
                updated.push(photo);
            }
        }
        if updated.is_empty() {
            return None;
        }
        Some(RoomEvent::Photos(PhotoEvent::Update(updated)))
    }

    pub fn delete_photo(&mut self, info_hash: &str) -> Vec<RoomEvent> {
        let before = self.photos.len();
        self.photos.retain(|p| p.info_hash != info_hash);
        if self.photos.len() == before {
            return Vec::new();
        }

        let mut events = vec![RoomEvent::Photos(PhotoEvent::Delete(info_hash.to_string()))];
        let filter = ClearConnectionsRequest {
            from_peer_id: None,
            info_hash: Some(info_hash.to_string()),
        };
        events.extend(self.clear_connections(&filter));
        events
    }

    /// Insert or refresh owners; at most one entry per peer per item.
    pub fn add_owners(&mut self, changes: &[OwnerChange]) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        for change in changes {
            let Some(photo) = self.photos.iter_mut().find(|p| p.info_hash == change.info_hash) else {
                continue;
            };
            let existed = photo.has_owner(&change.peer_id);
            *photo = photo.with_owner(change.to_owner());
            events.push(RoomEvent::Photos(if existed {
                PhotoEvent::UpdateOwner(change.clone())
            } else {
                PhotoEvent::AddOwner(change.clone())
            }));
        }
        events
    }

    /// Update existing owners only; unknown owners are ignored.
    pub fn update_owners(&mut self, changes: &[OwnerChange]) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        for change in changes {
            let Some(photo) = self.photos.iter_mut().find(|p| p.info_hash == change.info_hash) else {
                continue;
            };
            if !photo.has_owner(&change.peer_id) {
                continue;
            }
            *photo = photo.with_owner(change.to_owner());
            events.push(RoomEvent::Photos(PhotoEvent::UpdateOwner(change.clone())));
        }
        events
    }

    pub fn remove_owners(&mut self, changes: &[OwnerChange]) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        for change in changes {
            let Some(photo) = self.photos.iter_mut().find(|p| p.info_hash == change.info_hash) else {
                continue;
            };
            if !photo.has_owner(&change.peer_id) {
                continue;
            }
            *photo = photo.without_owner(&change.peer_id);
            events.push(RoomEvent::Photos(PhotoEvent::RemoveOwner(change.clone())));
        }
        events
    }

    /// Record a link, replacing an earlier report of the same link.
    pub fn report_connection(&mut self, connection: Connection) -> RoomEvent {
        match self.connections.iter_mut().find(|c| c.same_link(&connection)) {
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
        RoomEvent::Connections(self.connections.clone())
    }

    pub fn clear_connections(&mut self, filter: &ClearConnectionsRequest) -> Option<RoomEvent> {
        let before = self.connections.len();
        self.connections.retain(|c| !filter.matches(c));
        if self.connections.len() == before {
            return None;
        }
        Some(RoomEvent::Connections(self.connections.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Owner, RoomId};

    fn room_with_photo() -> Room {
        let mut room = Room::new(RoomId::from("r1"));
        room.upsert_peer(Peer::new(PeerId::from("a"), "s", "alice"));
        room.share_photos(vec![PhotoRecord::new("h1", "a.jpg", "image/jpeg", 1)]);
        room
    }

    fn change(peer: &str, loading: bool) -> OwnerChange {
        OwnerChange::new(
            "h1",
            &Owner {
                peer_id: PeerId::from(peer),
                loading,
                progress: if loading { 0.0 } else { 1.0 },
            },
        )
    }

    #[test]
    fn share_skips_duplicates() {
        let mut room = room_with_photo();
        assert!(room
            .share_photos(vec![PhotoRecord::new("h1", "again.jpg", "image/jpeg", 1)])
            .is_none());
        assert_eq!(room.photos.len(), 1);
    }

    #[test]
    fn add_owner_twice_keeps_one_entry() {
        let mut room = room_with_photo();
        let first = room.add_owners(&[change("a", true)]);
        let second = room.add_owners(&[change("a", false)]);
        assert!(matches!(first[0], RoomEvent::Photos(PhotoEvent::AddOwner(_))));
        assert!(matches!(second[0], RoomEvent::Photos(PhotoEvent::UpdateOwner(_))));
        assert_eq!(room.photos[0].owners.len(), 1);
        assert!(!room.photos[0].owners[0].loading);
    }

    #[test]
    fn removing_peer_prunes_ownership() {
        let mut room = room_with_photo();
        room.add_owners(&[change("a", false)]);
        let events = room.remove_peer(&PeerId::from("a"));
        assert_eq!(events.len(), 2);
        assert!(room.photos[0].owners.is_empty());
        assert!(room.peers.is_empty());
    }

    #[test]
    fn delete_photo_clears_its_connections() {
        let mut room = room_with_photo();
        room.report_connection(Connection {
            from_peer_id: PeerId::from("a"),
            to_peer_id: PeerId::from("b"),
            info_hash: "h1".into(),
            connection_type: "webrtc".into(),
            from: "10.0.0.1".into(),
            from_port: 1,
            to: "10.0.0.2".into(),
            to_port: 2,
        });
        let events = room.delete_photo("h1");
        assert_eq!(events.len(), 2);
        assert!(room.connections.is_empty());
        assert!(room.delete_photo("h1").is_empty());
    }

    #[test]
    fn update_photos_keeps_owners() {
        let mut room = room_with_photo();
        room.add_owners(&[change("a", false)]);
        let event = room.update_photos(vec![PhotoRecord::new("h1", "renamed.jpg", "image/jpeg", 1)]);
        assert!(event.is_some());
        assert_eq!(room.photos[0].file_name, "renamed.jpg");
        assert_eq!(room.photos[0].owners.len(), 1);
    }
}
