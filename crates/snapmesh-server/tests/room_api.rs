//! End-to-end tests of the HTTP API through the client crate's `RoomClient`.

use std::time::Duration;

use futures::StreamExt;
use snapmesh_net::{PushStream, RoomApi, RoomClient};
use snapmesh_server::{build_router, AppState, ServerConfig};
use snapmesh_shared::protocol::{
    ClearConnectionsRequest, OwnerChange, PeerEvent, PhotoEvent, RoomEvent,
};
use snapmesh_shared::{Connection, Owner, Peer, PeerId, PeerUpdate, PhotoRecord, RoomId};

async fn spawn_server(config: ServerConfig) -> RoomClient {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(AppState::new(config));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    RoomClient::new(&format!("http://{addr}")).unwrap()
}

fn peer(id: &str) -> Peer {
    Peer::new(PeerId::from(id), format!("session-{id}"), id)
}

fn photo(id: &str) -> PhotoRecord {
    PhotoRecord::new(id, format!("{id}.jpg"), "image/jpeg", 42)
}

async fn next_event(stream: &mut PushStream) -> RoomEvent {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("push event timed out")
        .expect("push stream ended")
        .expect("undecodable push event")
}

#[tokio::test]
async fn create_then_join() {
    let client = spawn_server(ServerConfig::default()).await;
    let room_id = RoomId::from("kitchen");

    let room = client.create_room(&room_id, &peer("a")).await.unwrap();
    assert_eq!(room.id, room_id);
    assert_eq!(room.peers.len(), 1);

    let room = client.join_room(&room_id, &peer("b")).await.unwrap();
    assert_eq!(room.peers.len(), 2);

    let fetched = client.fetch_room(&room_id).await.unwrap();
    assert_eq!(fetched.peers.len(), 2);
}

#[tokio::test]
async fn missing_room_is_not_found() {
    let client = spawn_server(ServerConfig::default()).await;
    let room_id = RoomId::from("nowhere");

    let err = client.join_room(&room_id, &peer("a")).await.unwrap_err();
    assert!(err.is_not_found());

    let err = client.fetch_room(&room_id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn room_limit_is_enforced() {
    let client = spawn_server(ServerConfig {
        max_rooms: 1,
        ..ServerConfig::default()
    })
    .await;

    client.create_room(&RoomId::from("r1"), &peer("a")).await.unwrap();
    client.create_room(&RoomId::from("r1"), &peer("b")).await.unwrap();
    let err = client.create_room(&RoomId::from("r2"), &peer("a")).await.unwrap_err();
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn shared_items_are_listed_once() {
    let client = spawn_server(ServerConfig::default()).await;
    let room_id = RoomId::from("r1");
    client.create_room(&room_id, &peer("a")).await.unwrap();

    client.share_photos(&room_id, &[photo("h1"), photo("h2")]).await.unwrap();
    client.share_photos(&room_id, &[photo("h1")]).await.unwrap();

    let mut renamed = photo("h2");
    renamed.file_name = "beach.jpg".to_string();
    client.update_photos(&room_id, &[renamed]).await.unwrap();

    let room = client.fetch_room(&room_id).await.unwrap();
    assert_eq!(room.photos.len(), 2);
    assert_eq!(room.photo("h2").unwrap().file_name, "beach.jpg");

    client.delete_photo(&room_id, "h1").await.unwrap();
    let room = client.fetch_room(&room_id).await.unwrap();
    assert!(room.photo("h1").is_none());
}

#[tokio::test]
async fn subscribers_get_snapshot_then_changes() {
    let client = spawn_server(ServerConfig::default()).await;
    let room_id = RoomId::from("r1");
    client.create_room(&room_id, &peer("a")).await.unwrap();
    client.share_photos(&room_id, &[photo("h1")]).await.unwrap();

    let mut stream = client.subscribe(&room_id, "session-a").await.unwrap();

    assert!(matches!(
        next_event(&mut stream).await,
        RoomEvent::Photos(PhotoEvent::All(photos)) if photos.len() == 1
    ));
    assert!(matches!(
        next_event(&mut stream).await,
        RoomEvent::Peers(PeerEvent::All(peers)) if peers.len() == 1
    ));
    assert!(matches!(
        next_event(&mut stream).await,
        RoomEvent::Connections(connections) if connections.is_empty()
    ));

    client.share_photos(&room_id, &[photo("h2")]).await.unwrap();
    assert!(matches!(
        next_event(&mut stream).await,
        RoomEvent::Photos(PhotoEvent::Add(photos)) if photos[0].info_hash == "h2"
    ));

    client.join_room(&room_id, &peer("b")).await.unwrap();
    assert!(matches!(
        next_event(&mut stream).await,
        RoomEvent::Peers(PeerEvent::Add(p)) if p.peer_id == PeerId::from("b")
    ));

    let update = PeerUpdate {
        name: Some("Bea".to_string()),
        ..PeerUpdate::default()
    };
    client.update_peer(&room_id, &PeerId::from("b"), &update).await.unwrap();
    assert!(matches!(
        next_event(&mut stream).await,
        RoomEvent::Peers(PeerEvent::Update(p)) if p.name == "Bea"
    ));
}

#[tokio::test]
async fn leaving_prunes_ownership_and_connections() {
    let client = spawn_server(ServerConfig::default()).await;
    let room_id = RoomId::from("r1");
    let a = PeerId::from("a");
    let b = PeerId::from("b");
    client.create_room(&room_id, &peer("a")).await.unwrap();
    client.join_room(&room_id, &peer("b")).await.unwrap();
    client.share_photos(&room_id, &[photo("h1")]).await.unwrap();

    client
        .add_owners(
            &room_id,
            &[
                OwnerChange::new("h1", &Owner::complete(a.clone())),
                OwnerChange::new("h1", &Owner::loading(b.clone())),
            ],
        )
        .await
        .unwrap();
    client
        .update_owners(&room_id, &[OwnerChange::new("h1", &Owner::complete(b.clone()))])
        .await
        .unwrap();

    let connection = Connection {
        from_peer_id: a.clone(),
        to_peer_id: b.clone(),
        info_hash: "h1".to_string(),
        connection_type: "tcp".to_string(),
        from: "10.0.0.1".to_string(),
        from_port: 6881,
        to: "10.0.0.2".to_string(),
        to_port: 6882,
    };
    client.report_connection(&room_id, &connection).await.unwrap();

    let room = client.fetch_room(&room_id).await.unwrap();
    assert_eq!(room.photo("h1").unwrap().owners.len(), 2);
    assert!(room.photo("h1").unwrap().owners.iter().all(|o| !o.loading));
    assert_eq!(room.connections.len(), 1);

    client.leave_room(&room_id, &b).await.unwrap();

    let room = client.fetch_room(&room_id).await.unwrap();
    assert!(room.peer(&b).is_none());
    let item = room.photo("h1").unwrap();
    assert!(item.has_owner(&a));
    assert!(!item.has_owner(&b));
    assert!(room.connections.is_empty());
}

#[tokio::test]
async fn owners_and_connections_can_be_removed() {
    let client = spawn_server(ServerConfig::default()).await;
    let room_id = RoomId::from("r1");
    let a = PeerId::from("a");
    client.create_room(&room_id, &peer("a")).await.unwrap();
    client.share_photos(&room_id, &[photo("h1")]).await.unwrap();

    let change = OwnerChange::new("h1", &Owner::complete(a.clone()));
    client.add_owners(&room_id, &[change.clone()]).await.unwrap();
    client.remove_owners(&room_id, &[change]).await.unwrap();

    let connection = Connection {
        from_peer_id: a.clone(),
        to_peer_id: PeerId::from("b"),
        info_hash: "h1".to_string(),
        connection_type: "utp".to_string(),
        from: "10.0.0.1".to_string(),
        from_port: 6881,
        to: "10.0.0.2".to_string(),
        to_port: 6882,
    };
    client.report_connection(&room_id, &connection).await.unwrap();
    let filter = ClearConnectionsRequest {
        from_peer_id: Some(a.clone()),
        info_hash: None,
    };
    client.clear_connections(&room_id, &filter).await.unwrap();

    let room = client.fetch_room(&room_id).await.unwrap();
    assert!(room.photo("h1").unwrap().owners.is_empty());
    assert!(room.connections.is_empty());
}

#[tokio::test]
async fn wipe_requires_opt_in() {
    let locked = spawn_server(ServerConfig::default()).await;
    locked.create_room(&RoomId::from("r1"), &peer("a")).await.unwrap();
    assert!(locked.wipe_rooms().await.is_err());
    assert!(locked.fetch_room(&RoomId::from("r1")).await.is_ok());

    let open = spawn_server(ServerConfig {
        allow_wipe: true,
        ..ServerConfig::default()
    })
    .await;
    open.create_room(&RoomId::from("r1"), &peer("a")).await.unwrap();
    open.wipe_rooms().await.unwrap();
    assert!(open.fetch_room(&RoomId::from("r1")).await.unwrap_err().is_not_found());
}
