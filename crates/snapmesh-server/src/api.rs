use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use snapmesh_shared::protocol::{
    ClearConnectionsRequest, CreateRoomRequest, JoinRoomRequest, OwnersRequest, PhotoKey,
    PhotosRequest, RoomEvent,
};
use snapmesh_shared::{Connection, PeerId, PeerUpdate, Room, RoomId};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rooms::RoomRegistry;

#[derive(Clone)]
pub struct AppState {
    pub rooms: RoomRegistry,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: RoomRegistry::new(config.max_rooms),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/rooms/", post(create_room).delete(wipe_rooms))
        .route("/api/rooms/:id", post(join_room).get(get_room))
        .route("/api/rooms/:id/peers/:peer_id", put(update_peer).delete(leave_room))
        .route(
            "/api/rooms/:id/photos/",
            post(share_photos).put(update_photos).delete(delete_photo),
        )
        .route(
            "/api/rooms/:id/photos/owners/",
            post(add_owners).put(update_owners).delete(remove_owners),
        )
        .route(
            "/api/rooms/:id/connections",
            post(report_connection).delete(clear_connections),
        )
        .route("/api/rooms/:id/updates/", get(updates))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the future is dropped.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rooms: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.rooms.len().await,
    })
}

// ---------------------------------------------------------------------------
// Rooms and peers
// ---------------------------------------------------------------------------

async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<Json<Room>, ServerError> {
    if body.id.as_str().is_empty() {
        return Err(ServerError::BadRequest("room id must not be empty".to_string()));
    }
    let room = state.rooms.create(body.id, body.peer).await?;
    Ok(Json(room))
}

async fn wipe_rooms(State(state): State<AppState>) -> Result<StatusCode, ServerError> {
    if !state.config.allow_wipe {
        return Err(ServerError::Forbidden("room wipe is disabled".to_string()));
    }
    let count = state.rooms.wipe().await;
    warn!(count, "all rooms wiped");
    Ok(StatusCode::NO_CONTENT)
}

async fn join_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<JoinRoomRequest>,
) -> Result<Json<Room>, ServerError> {
    let room = state.rooms.join(&RoomId(id), body.peer).await?;
    Ok(Json(room))
}

async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Room>, ServerError> {
    Ok(Json(state.rooms.get(&RoomId(id)).await?))
}

async fn update_peer(
    State(state): State<AppState>,
    Path((id, peer_id)): Path<(String, String)>,
    Json(update): Json<PeerUpdate>,
) -> Result<StatusCode, ServerError> {
    let peer_id = PeerId(peer_id);
    state
        .rooms
        .mutate(&RoomId(id), |room| {
            room.update_peer(&peer_id, &update)
                .map(|event| vec![event])
                .ok_or_else(|| ServerError::PeerNotFound(peer_id.to_string()))
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_room(
    State(state): State<AppState>,
    Path((id, peer_id)): Path<(String, String)>,
) -> Result<StatusCode, ServerError> {
    let peer_id = PeerId(peer_id);
    let events = state
        .rooms
        .mutate(&RoomId(id.clone()), |room| Ok(room.remove_peer(&peer_id)))
        .await?;
    info!(room = %id, peer = %peer_id.short(), events, "peer left");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Items and ownership
// ---------------------------------------------------------------------------

async fn share_photos(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PhotosRequest>,
) -> Result<StatusCode, ServerError> {
    let count = body.photos.len();
    state
        .rooms
        .mutate(&RoomId(id.clone()), |room| {
            Ok(room.share_photos(body.photos).into_iter().collect())
        })
        .await?;
    debug!(room = %id, count, "items shared");
    Ok(StatusCode::NO_CONTENT)
}

async fn update_photos(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PhotosRequest>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id), |room| {
            Ok(room.update_photos(body.photos).into_iter().collect())
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_photo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PhotoKey>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id.clone()), |room| Ok(room.delete_photo(&body.info_hash)))
        .await?;
    debug!(room = %id, info_hash = %body.info_hash, "item deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn add_owners(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OwnersRequest>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id), |room| Ok(room.add_owners(&body.owners)))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_owners(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OwnersRequest>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id), |room| Ok(room.update_owners(&body.owners)))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_owners(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<OwnersRequest>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id), |room| Ok(room.remove_owners(&body.owners)))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

async fn report_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(connection): Json<Connection>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id), |room| Ok(vec![room.report_connection(connection)]))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_connections(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(filter): Json<ClearConnectionsRequest>,
) -> Result<StatusCode, ServerError> {
    state
        .rooms
        .mutate(&RoomId(id), |room| {
            Ok(room.clear_connections(&filter).into_iter().collect())
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Push stream
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatesQuery {
    session_id: Option<String>,
}

async fn updates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UpdatesQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let room_id = RoomId(id);
    let (snapshot, rx) = state.rooms.subscribe(&room_id).await?;
    info!(
        room = %room_id,
        session = query.session_id.as_deref().unwrap_or("-"),
        "push stream opened"
    );

    let live = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "push subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::iter(snapshot)
        .chain(live)
        .filter_map(|event| async move { to_sse(&event) })
        .map(Ok);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &RoomEvent) -> Option<Event> {
    let encoded = event.encode().and_then(|(channel, envelope)| {
        let data = serde_json::to_string(&envelope)?;
        Ok((channel, data))
    });
    match encoded {
        Ok((channel, data)) => Some(Event::default().event(channel.as_str()).data(data)),
        Err(e) => {
            warn!(error = %e, "failed to encode push event");
            None
        }
    }
}
