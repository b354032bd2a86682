use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::photo::PhotoRecord;
use crate::types::{Connection, Owner, Peer, PeerId, RoomId};

/// Named event streams multiplexed on the room push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushChannel {
    Photos,
    Peers,
    PeerConnections,
}

impl PushChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photos => "photos",
            Self::Peers => "peers",
            Self::PeerConnections => "peerConnections",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "photos" => Ok(Self::Photos),
            "peers" => Ok(Self::Peers),
            "peerConnections" => Ok(Self::PeerConnections),
            other => Err(ProtocolError::UnknownChannel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateKind {
    All,
    Add,
    Update,
    Delete,
    AddOwner,
    RemoveOwner,
    UpdateOwner,
}

/// `{type, item}` body of every push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub item: serde_json::Value,
}

/// Ownership change for one peer on one item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerChange {
    pub info_hash: String,
    pub peer_id: PeerId,
    pub loading: bool,
    pub progress: f64,
}

impl OwnerChange {
    pub fn new(info_hash: impl Into<String>, owner: &Owner) -> Self {
        Self {
            info_hash: info_hash.into(),
            peer_id: owner.peer_id.clone(),
            loading: owner.loading,
            progress: owner.progress,
        }
    }

    pub fn to_owner(&self) -> Owner {
        Owner {
            peer_id: self.peer_id.clone(),
            loading: self.loading,
            progress: self.progress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoKey {
    pub info_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerKey {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhotoEvent {
    All(Vec<PhotoRecord>),
    Add(Vec<PhotoRecord>),
    Update(Vec<PhotoRecord>),
    Delete(String),
    AddOwner(OwnerChange),
    RemoveOwner(OwnerChange),
    UpdateOwner(OwnerChange),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    All(Vec<Peer>),
    Add(Peer),
    Update(Peer),
    Delete(PeerId),
}

/// A decoded push event, in server-send order.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Photos(PhotoEvent),
    Peers(PeerEvent),
    /// Connections are always replaced wholesale.
    Connections(Vec<Connection>),
}

impl RoomEvent {
    /// Decode the `data` of a push event received on `channel`.
    pub fn decode(channel: &str, data: &str) -> Result<Self, ProtocolError> {
        let channel = PushChannel::from_name(channel)?;
        let envelope: PushEnvelope = serde_json::from_str(data)?;
        let item = envelope.item;

        let unsupported = || ProtocolError::UnsupportedUpdate {
            channel: channel.as_str().to_string(),
            kind: format!("{:?}", envelope.kind),
        };

        let event = match channel {
            PushChannel::Photos => RoomEvent::Photos(match envelope.kind {
                UpdateKind::All => PhotoEvent::All(serde_json::from_value(item)?),
                UpdateKind::Add => PhotoEvent::Add(serde_json::from_value(item)?),
                UpdateKind::Update => PhotoEvent::Update(serde_json::from_value(item)?),
                UpdateKind::Delete => {
                    let key: PhotoKey = serde_json::from_value(item)?;
                    PhotoEvent::Delete(key.info_hash)
                }
                UpdateKind::AddOwner => PhotoEvent::AddOwner(serde_json::from_value(item)?),
                UpdateKind::RemoveOwner => PhotoEvent::RemoveOwner(serde_json::from_value(item)?),
                UpdateKind::UpdateOwner => PhotoEvent::UpdateOwner(serde_json::from_value(item)?),
            }),
            PushChannel::Peers => RoomEvent::Peers(match envelope.kind {
                UpdateKind::All => PeerEvent::All(serde_json::from_value(item)?),
                UpdateKind::Add => PeerEvent::Add(serde_json::from_value(item)?),
                UpdateKind::Update => PeerEvent::Update(serde_json::from_value(item)?),
                UpdateKind::Delete => {
                    let key: PeerKey = serde_json::from_value(item)?;
                    PeerEvent::Delete(key.peer_id)
                }
                _ => return Err(unsupported()),
            }),
            PushChannel::PeerConnections => match envelope.kind {
                UpdateKind::All => RoomEvent::Connections(serde_json::from_value(item)?),
                _ => return Err(unsupported()),
            },
        };

        Ok(event)
    }

    /// Encode into the channel name and envelope the push stream carries.
    pub fn encode(&self) -> Result<(PushChannel, PushEnvelope), ProtocolError> {
        let (channel, kind, item) = match self {
            RoomEvent::Photos(event) => {
                let (kind, item) = match event {
                    PhotoEvent::All(p) => (UpdateKind::All, serde_json::to_value(p)?),
                    PhotoEvent::Add(p) => (UpdateKind::Add, serde_json::to_value(p)?),
                    PhotoEvent::Update(p) => (UpdateKind::Update, serde_json::to_value(p)?),
                    PhotoEvent::Delete(h) => (
                        UpdateKind::Delete,
                        serde_json::to_value(PhotoKey { info_hash: h.clone() })?,
                    ),
                    PhotoEvent::AddOwner(c) => (UpdateKind::AddOwner, serde_json::to_value(c)?),
                    PhotoEvent::RemoveOwner(c) => (UpdateKind::RemoveOwner, serde_json::to_value(c)?),
                    PhotoEvent::UpdateOwner(c) => (UpdateKind::UpdateOwner, serde_json::to_value(c)?),
                };
                (PushChannel::Photos, kind, item)
            }
            RoomEvent::Peers(event) => {
                let (kind, item) = match event {
                    PeerEvent::All(p) => (UpdateKind::All, serde_json::to_value(p)?),
                    PeerEvent::Add(p) => (UpdateKind::Add, serde_json::to_value(p)?),
                    PeerEvent::Update(p) => (UpdateKind::Update, serde_json::to_value(p)?),
                    PeerEvent::Delete(id) => (
                        UpdateKind::Delete,
                        serde_json::to_value(PeerKey { peer_id: id.clone() })?,
                    ),
                };
                (PushChannel::Peers, kind, item)
            }
            RoomEvent::Connections(c) => (
                PushChannel::PeerConnections,
                UpdateKind::All,
                serde_json::to_value(c)?,
            ),
        };

        Ok((channel, PushEnvelope { kind, item }))
    }
}

// ---------------------------------------------------------------------------
// REST request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub id: RoomId,
    pub peer: Peer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub peer: Peer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotosRequest {
    pub photos: Vec<PhotoRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnersRequest {
    pub owners: Vec<OwnerChange>,
}

/// Body of `DELETE /{id}/connections`. Absent fields match anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClearConnectionsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_peer_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
}

impl ClearConnectionsRequest {
    pub fn matches(&self, connection: &Connection) -> bool {
        self.from_peer_id
            .as_ref()
            .map_or(true, |p| &connection.from_peer_id == p || &connection.to_peer_id == p)
            && self
                .info_hash
                .as_ref()
                .map_or(true, |h| &connection.info_hash == h)
    }
}
