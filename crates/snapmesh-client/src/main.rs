//! Diagnostic peer: joins a room, shares the files given on the command
//! line and logs what happens until Ctrl+C.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use snapmesh_client::{
    init_tracing, ClientConfig, ContentEvent, Coordinator, MemoryEngine, NoThumbnails,
    SourceFile, SqliteStore,
};
use snapmesh_net::{RoomClient, WebRtcGatherer};
use snapmesh_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    info!(server = %config.server_url, "Starting snapmesh peer");

    let db = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("failed to open local database")?;
    if let Some(path) = db.path() {
        info!(path = %path.display(), "Database opened");
    }

    let room_api = Arc::new(
        RoomClient::new(&config.server_url).context("invalid coordination server URL")?,
    );
    let coordinator = Arc::new(Coordinator::new(
        room_api,
        Arc::new(MemoryEngine::new()),
        Arc::new(SqliteStore::new(db)),
        Arc::new(NoThumbnails),
        &config,
    ));

    let room = coordinator.join_room().await.context("failed to join room")?;
    info!(room = %room.id, peer = %coordinator.local_peer().peer_id.short(), "Ready");

    {
        let coordinator = Arc::clone(&coordinator);
        let gatherer = WebRtcGatherer::new(config.stun_servers.clone(), config.ice_timeout);
        tokio::spawn(async move { coordinator.discover_topology(&gatherer).await });
    }

    let mut events = coordinator.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            match event {
                ContentEvent::Progress { .. } => tracing::debug!(event = %json, "progress"),
                _ => info!(event = %json, "content event"),
            }
        }
    });

    let mut files = Vec::new();
    for arg in std::env::args().skip(1) {
        let path = Path::new(&arg);
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| arg.clone());
        files.push(SourceFile::new(name.clone(), guess_mime(&name), data));
    }
    if !files.is_empty() {
        match coordinator.share(files, false, Vec::new()).await {
            Ok(seeded) => info!(items = ?seeded.info_hashes, "Shared"),
            Err(e) => error!(error = %e, "Share failed"),
        }
    }

    let push = coordinator.subscribe().await.context("failed to open push stream")?;
    tokio::select! {
        _ = coordinator.run(push) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    if let Err(e) = coordinator.leave_room().await {
        error!(error = %e, "Failed to leave room");
    }
    Ok(())
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}
