use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::photo::PhotoRecord;

// Peer identity as handed out by the coordination server / generated locally
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Random short room name, suitable for sharing by hand.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string()[..10].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer known to hold, or to be acquiring, a copy of an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub peer_id: PeerId,
    pub loading: bool,
    pub progress: f64,
}

impl Owner {
    pub fn loading(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            loading: true,
            progress: 0.0,
        }
    }

    pub fn complete(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            loading: false,
            progress: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
}

impl CandidateType {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "host" => Some(Self::Host),
            "srflx" => Some(Self::Srflx),
            "prflx" => Some(Self::Prflx),
            "relay" => Some(Self::Relay),
            _ => None,
        }
    }

    /// Reflexive candidates are the ones that reveal a NAT mapping.
    pub fn is_reflexive(self) -> bool {
        matches!(self, Self::Srflx | Self::Prflx)
    }
}

/// One hop of the local machine's observed network path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkChainEntry {
    pub ip: String,
    pub port: u16,
    pub transport: String,
    #[serde(rename = "type")]
    pub kind: CandidateType,
    pub type_detail: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub peer_id: PeerId,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub origin_platform: String,
    #[serde(default)]
    pub connection_speed_type: String,
    #[serde(default)]
    pub network_chain: Vec<NetworkChainEntry>,
}

impl Peer {
    pub fn new(peer_id: PeerId, session_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            session_id: session_id.into(),
            name: name.into(),
            origin_platform: std::env::consts::OS.to_string(),
            connection_speed_type: String::new(),
            network_chain: Vec::new(),
        }
    }

    /// Return a copy of this peer with every field present in `update` applied.
    pub fn apply(&self, update: &PeerUpdate) -> Self {
        let mut next = self.clone();
        if let Some(ref session_id) = update.session_id {
            next.session_id = session_id.clone();
        }
        if let Some(ref name) = update.name {
            next.name = name.clone();
        }
        if let Some(ref speed) = update.connection_speed_type {
            next.connection_speed_type = speed.clone();
        }
        if let Some(ref chain) = update.network_chain {
            next.network_chain = chain.clone();
        }
        next
    }
}

/// Partial peer update sent to `PUT /{id}/peers/{peerId}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_speed_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_chain: Option<Vec<NetworkChainEntry>>,
}

/// A wire-level link between two peers for one item. Diagnostics only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_peer_id: PeerId,
    pub to_peer_id: PeerId,
    pub info_hash: String,
    pub connection_type: String,
    pub from: String,
    pub from_port: u16,
    pub to: String,
    pub to_port: u16,
}

impl Connection {
    /// Two reports describe the same link regardless of address churn.
    pub fn same_link(&self, other: &Connection) -> bool {
        self.from_peer_id == other.from_peer_id
            && self.to_peer_id == other.to_peer_id
            && self.info_hash == other.info_hash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default)]
    pub photos: Vec<PhotoRecord>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            peers: Vec::new(),
            photos: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn photo(&self, info_hash: &str) -> Option<&PhotoRecord> {
        self.photos.iter().find(|p| p.info_hash == info_hash)
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| &p.peer_id == peer_id)
    }
}
