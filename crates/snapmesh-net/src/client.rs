//! HTTP client for the coordination server.
//!
//! Thin typed wrapper around `reqwest` for the `/api/rooms` REST surface and
//! the server-sent event push stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use snapmesh_shared::constants::API_BASE;
use snapmesh_shared::protocol::{
    ClearConnectionsRequest, CreateRoomRequest, JoinRoomRequest, OwnerChange, OwnersRequest,
    PhotoKey, PhotosRequest, RoomEvent,
};
use snapmesh_shared::{Connection, Peer, PeerId, PeerUpdate, PhotoRecord, Room, RoomId};

use crate::api::{PushStream, RoomApi};
use crate::error::NetError;
use crate::sse::SseDecoder;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RoomClient {
    http: Client,
    /// The HTTP client used for the push stream has no overall timeout.
    stream_http: Client,
    server_url: String,
}

impl RoomClient {
    pub fn new(server_url: &str) -> Result<Self, NetError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let stream_http = Client::builder().build()?;
        Ok(Self {
            http,
            stream_http,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.server_url, API_BASE, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, NetError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "room server rejected request");
        Err(NetError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, NetError> {
        let response = self.send(request).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), NetError> {
        self.send(request).await.map(|_| ())
    }

    /// Wipe every room on the server. Admin / test only.
    pub async fn wipe_rooms(&self) -> Result<(), NetError> {
        info!(server = %self.server_url, "wiping all rooms");
        self.send_empty(self.http.delete(self.url("/"))).await
    }
}

#[async_trait]
impl RoomApi for RoomClient {
    async fn create_room(&self, room_id: &RoomId, peer: &Peer) -> Result<Room, NetError> {
        let body = CreateRoomRequest {
            id: room_id.clone(),
            peer: peer.clone(),
        };
        debug!(room = %room_id, peer = %peer.peer_id.short(), "creating room");
        self.send_json(self.http.post(self.url("/")).json(&body))
            .await
    }

    async fn join_room(&self, room_id: &RoomId, peer: &Peer) -> Result<Room, NetError> {
        let body = JoinRoomRequest { peer: peer.clone() };
        debug!(room = %room_id, peer = %peer.peer_id.short(), "joining room");
        let request = self.http.post(self.url(&format!("/{room_id}"))).json(&body);
        self.send_json(request).await
    }

    async fn fetch_room(&self, room_id: &RoomId) -> Result<Room, NetError> {
        match self.send_json(self.http.get(self.url(&format!("/{room_id}")))).await {
            Err(NetError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(NetError::RoomNotFound(room_id.to_string()))
            }
            other => other,
        }
    }

    async fn update_peer(
        &self,
        room_id: &RoomId,
        peer_id: &PeerId,
        update: &PeerUpdate,
    ) -> Result<(), NetError> {
        let url = self.url(&format!("/{room_id}/peers/{peer_id}"));
        self.send_empty(self.http.put(url).json(update)).await
    }

    async fn leave_room(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), NetError> {
        let url = self.url(&format!("/{room_id}/peers/{peer_id}"));
        self.send_empty(self.http.delete(url)).await
    }

    async fn share_photos(&self, room_id: &RoomId, photos: &[PhotoRecord]) -> Result<(), NetError> {
        let body = PhotosRequest {
            photos: photos.to_vec(),
        };
        let url = self.url(&format!("/{room_id}/photos/"));
        self.send_empty(self.http.post(url).json(&body)).await
    }

    async fn update_photos(&self, room_id: &RoomId, photos: &[PhotoRecord]) -> Result<(), NetError> {
        let body = PhotosRequest {
            photos: photos.to_vec(),
        };
        let url = self.url(&format!("/{room_id}/photos/"));
        self.send_empty(self.http.put(url).json(&body)).await
    }

    async fn delete_photo(&self, room_id: &RoomId, info_hash: &str) -> Result<(), NetError> {
        let body = PhotoKey {
            info_hash: info_hash.to_string(),
        };
        let url = self.url(&format!("/{room_id}/photos/"));
        self.send_empty(self.http.delete(url).json(&body)).await
    }

    async fn add_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError> {
        let body = OwnersRequest {
            owners: owners.to_vec(),
        };
        let url = self.url(&format!("/{room_id}/photos/owners/"));
        self.send_empty(self.http.post(url).json(&body)).await
    }

    async fn update_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError> {
        let body = OwnersRequest {
            owners: owners.to_vec(),
        };
        let url = self.url(&format!("/{room_id}/photos/owners/"));
        self.send_empty(self.http.put(url).json(&body)).await
    }

    async fn remove_owners(&self, room_id: &RoomId, owners: &[OwnerChange]) -> Result<(), NetError> {
        let body = OwnersRequest {
            owners: owners.to_vec(),
        };
        let url = self.url(&format!("/{room_id}/photos/owners/"));
        self.send_empty(self.http.delete(url).json(&body)).await
    }

    async fn report_connection(&self, room_id: &RoomId, connection: &Connection) -> Result<(), NetError> {
        let url = self.url(&format!("/{room_id}/connections"));
        self.send_empty(self.http.post(url).json(connection)).await
    }

    async fn clear_connections(
        &self,
        room_id: &RoomId,
        filter: &ClearConnectionsRequest,
    ) -> Result<(), NetError> {
        let url = self.url(&format!("/{room_id}/connections"));
        self.send_empty(self.http.delete(url).json(filter)).await
    }

    async fn subscribe(&self, room_id: &RoomId, session_id: &str) -> Result<PushStream, NetError> {
        let url = self.url(&format!("/{room_id}/updates/"));
        let request = self
            .stream_http
            .get(url)
            .query(&[("sessionId", session_id)])
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.send(request).await?;

        info!(room = %room_id, session = %session_id, "push stream opened");

        let bytes = response.bytes_stream().boxed();
        let state = (bytes, SseDecoder::default(), VecDeque::new());

        let stream = futures::stream::unfold(state, |(mut bytes, mut decoder, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    let crate::sse::SseEvent { event: name, data } = event;
                    let decoded = RoomEvent::decode(&name, &data).map_err(NetError::from);
                    return Some((decoded, (bytes, decoder, pending)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(&chunk)),
                    Some(Err(e)) => {
                        warn!(error = %e, "push stream read failed");
                        return Some((Err(NetError::Http(e)), (bytes, decoder, pending)));
                    }
                    None => {
                        debug!("push stream ended");
                        return None;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_rooted_at_api_base() {
        let client = RoomClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.url("/"), "http://localhost:8080/api/rooms/");
        assert_eq!(client.url("/r1/photos/"), "http://localhost:8080/api/rooms/r1/photos/");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        // Port 9 (discard) on localhost is closed on any sane test machine.
        let client = RoomClient::new("http://127.0.0.1:9").unwrap();
        let err = client.fetch_room(&RoomId::from("r1")).await.unwrap_err();
        assert!(matches!(err, NetError::Http(_)));
        assert!(err.is_unreachable());
    }
}
