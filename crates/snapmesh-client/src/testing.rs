//! Fixtures shared by the unit tests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use snapmesh_net::MemoryRoom;
use snapmesh_shared::{Room, RoomId};

use crate::addition::AdditionManager;
use crate::config::ClientConfig;
use crate::coordinator::Coordinator;
use crate::engine::{ContentEngine, EngineFile, MemoryEngine};
use crate::events::ContentEvent;
use crate::session::Session;
use crate::store::{DescriptorStore, SqliteStore};
use crate::thumbnail::{NoThumbnails, ThumbnailExtractor};

pub const ROOM: &str = "room-1";

pub fn file(path: &str, name: &str) -> EngineFile {
    EngineFile {
        path: path.to_string(),
        name: name.to_string(),
        length: 3,
        mime: "image/jpeg".to_string(),
    }
}

/// A coordinator wired to in-process doubles.
pub struct Harness {
    pub coordinator: Coordinator,
    pub session: Arc<Session>,
    pub additions: Arc<AdditionManager>,
    pub room: Arc<MemoryRoom>,
    pub engine: Arc<MemoryEngine>,
}

impl Harness {
    pub fn new() -> Self {
        let engine = Arc::new(MemoryEngine::new());
        Self::with_engine(engine.clone(), engine)
    }

    /// `engine` is what the coordinator talks to; `memory` is the engine
    /// behind it, for assertions.
    pub fn with_engine(memory: Arc<MemoryEngine>, engine: Arc<dyn ContentEngine>) -> Self {
        let store = SqliteStore::in_memory().expect("in-memory store");
        Self::build(Self::default_room(), memory, engine, Arc::new(store))
    }

    pub fn default_room() -> Arc<MemoryRoom> {
        Arc::new(MemoryRoom::with_room(Room::new(RoomId::from(ROOM))))
    }

    pub fn build(
        room: Arc<MemoryRoom>,
        memory: Arc<MemoryEngine>,
        engine: Arc<dyn ContentEngine>,
        store: Arc<dyn DescriptorStore>,
    ) -> Self {
        Self::build_with(room, memory, engine, store, Arc::new(NoThumbnails))
    }

    /// A harness whose uploads get previews from `thumbnails`.
    pub fn with_thumbnails(thumbnails: Arc<dyn ThumbnailExtractor>) -> Self {
        let engine = Arc::new(MemoryEngine::new());
        let store = SqliteStore::in_memory().expect("in-memory store");
        Self::build_with(Self::default_room(), engine.clone(), engine, Arc::new(store), thumbnails)
    }

    pub fn build_with(
        room: Arc<MemoryRoom>,
        memory: Arc<MemoryEngine>,
        engine: Arc<dyn ContentEngine>,
        store: Arc<dyn DescriptorStore>,
        thumbnails: Arc<dyn ThumbnailExtractor>,
    ) -> Self {
        let config = ClientConfig {
            room: Some(RoomId::from(ROOM)),
            progress_interval: Duration::ZERO,
            ..ClientConfig::default()
        };
        let coordinator = Coordinator::new(
            room.clone(),
            engine,
            store,
            thumbnails,
            &config,
        );
        Self {
            session: Arc::clone(coordinator.session()),
            additions: Arc::clone(coordinator.additions()),
            coordinator,
            room,
            engine: memory,
        }
    }

    /// Make `info_hash` downloadable, as if a remote peer seeded it.
    pub fn swarm_publish(&self, info_hash: &str, files: &[(&str, &str)]) {
        let entries = files
            .iter()
            .map(|&(path, data)| {
                let name = path.rsplit('/').next().unwrap_or(path);
                let entry = EngineFile {
                    length: data.len() as u64,
                    ..file(path, name)
                };
                (entry, Bytes::copy_from_slice(data.as_bytes()))
            })
            .collect();
        self.engine.swarm().publish(info_hash, entries);
    }
}

/// Wait for the first bus event matching `pred`.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<ContentEvent>, pred: F) -> ContentEvent
where
    F: Fn(&ContentEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event")
}
