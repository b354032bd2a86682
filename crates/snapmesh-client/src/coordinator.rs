//! Room-level content lifecycle.
//!
//! The coordinator owns the item list and keeps the engine in line with the
//! room: it joins, resurrects persisted transfers, applies push events and
//! periodically reconciles local engine content against the server's list.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use snapmesh_net::{IceGatherer, PeerRegistry, PushStream, RoomApi, TopologyDiscovery};
use snapmesh_shared::protocol::{OwnerChange, PeerEvent, PhotoEvent, RoomEvent};
use snapmesh_shared::{Owner, Peer, PeerId, PhotoRecord, PhotoState, Room, RoomId};
use snapmesh_store::Preferences;

use crate::addition::{AddOutcome, AdditionManager, Seeded};
use crate::config::ClientConfig;
use crate::deletion::DeletionManager;
use crate::engine::{ContentEngine, EngineAdapter, SourceFile};
use crate::error::ContentError;
use crate::events::{ContentEvent, EventBus};
use crate::session::Session;
use crate::state::{PhotoCollection, PhotoSnapshot};
use crate::store::DescriptorStore;
use crate::thumbnail::ThumbnailExtractor;

/// What happened to the persisted descriptors on join.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResurrectionSummary {
    pub resurrected: Vec<String>,
    /// Descriptors the room no longer lists; deleted locally.
    pub pruned: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub removed: Vec<String>,
    pub added: Vec<String>,
    pub healed: Vec<String>,
}

enum Resurrection {
    Resurrected,
    Pruned,
    Skipped,
    Failed,
}

pub struct Coordinator {
    session: Arc<Session>,
    additions: Arc<AdditionManager>,
    deletions: DeletionManager,
    discovery: TopologyDiscovery,
    reconcile_interval: Duration,
}

impl Coordinator {
    pub fn new(
        room_api: Arc<dyn RoomApi>,
        engine: Arc<dyn ContentEngine>,
        store: Arc<dyn DescriptorStore>,
        thumbnails: Arc<dyn ThumbnailExtractor>,
        config: &ClientConfig,
    ) -> Self {
        let prefs = store.preferences().unwrap_or_else(|e| {
            warn!(error = %e, "could not read preferences, using defaults");
            Preferences::default()
        });

        let peer_id = PeerId::new();
        let name = config
            .peer_name
            .clone()
            .or_else(|| prefs.peer_name.clone())
            .unwrap_or_else(|| format!("peer-{}", peer_id.short()));
        let local_peer = Peer::new(peer_id, Uuid::new_v4().to_string(), name);
        let room_id = config.room.clone().unwrap_or_else(RoomId::new);

        let peers = Arc::new(PeerRegistry::new(Arc::clone(&room_api), room_id.clone()));
        let session = Arc::new(Session {
            room_api,
            room_id,
            local_peer,
            engine: EngineAdapter::new(engine),
            store,
            photos: PhotoCollection::new(),
            peers,
            bus: EventBus::new(),
        });

        let additions = Arc::new(AdditionManager::new(
            Arc::clone(&session),
            thumbnails,
            prefs.sequential_download,
            config.progress_interval,
        ));

        Self {
            deletions: DeletionManager::new(Arc::clone(&session)),
            session,
            additions,
            discovery: TopologyDiscovery::new(),
            reconcile_interval: config.reconcile_interval,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.session.room_id
    }

    pub fn local_peer(&self) -> &Peer {
        &self.session.local_peer
    }

    pub fn photos(&self) -> PhotoSnapshot {
        self.session.photos.snapshot()
    }

    pub fn watch_photos(&self) -> watch::Receiver<PhotoSnapshot> {
        self.session.photos.subscribe()
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.session.peers
    }

    pub fn events(&self) -> broadcast::Receiver<ContentEvent> {
        self.session.bus.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn additions(&self) -> &Arc<AdditionManager> {
        &self.additions
    }

    // -- joining -------------------------------------------------------------

    /// Join the configured room, creating it when it does not exist yet.
    pub async fn join_room(&self) -> Result<Room, ContentError> {
        let session = &self.session;
        let api = &session.room_api;

        let room = match api.join_room(&session.room_id, &session.local_peer).await {
            Ok(room) => room,
            Err(e) if e.is_not_found() => {
                info!(room = %session.room_id, "room does not exist yet, creating it");
                api.create_room(&session.room_id, &session.local_peer).await?
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            room = %room.id,
            peers = room.peers.len(),
            photos = room.photos.len(),
            "joined room"
        );

        session.peers.set_peers(room.peers.clone());
        session.peers.replace_connections(room.connections.clone());
        session.photos.replace(room.photos.clone());

        let summary = self.resurrect(&room.photos).await;
        if !summary.resurrected.is_empty() || !summary.pruned.is_empty() {
            info!(
                resurrected = summary.resurrected.len(),
                pruned = summary.pruned.len(),
                failed = summary.failed.len(),
                "persisted transfers restored"
            );
        }
        self.reconcile(&room.photos).await;
        Ok(room)
    }

    /// Re-attach every persisted transfer the room still lists and drop the
    /// ones it does not. Entries run concurrently; failures stay isolated.
    pub async fn resurrect(&self, server_photos: &[PhotoRecord]) -> ResurrectionSummary {
        let descriptors = match self.session.store.list() {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!(error = %e, "could not list persisted transfers");
                return ResurrectionSummary::default();
            }
        };

        let tasks = descriptors.into_iter().map(|descriptor| async move {
            let base = descriptor.info_hash.clone();
            if self.session.engine.holds(&base) {
                return (base, Resurrection::Skipped);
            }

            let listed: Vec<PhotoRecord> = server_photos
                .iter()
                .filter(|p| p.base_hash() == base)
                .cloned()
                .collect();
            if listed.is_empty() {
                debug!(info_hash = %base, "room no longer lists persisted transfer");
                if let Err(e) = self.session.store.delete(&base) {
                    warn!(info_hash = %base, error = %e, "failed to prune descriptor");
                }
                return (base, Resurrection::Pruned);
            }

            match self.additions.resurrect(descriptor, listed).await {
                Ok(_) => (base, Resurrection::Resurrected),
                Err(e) => {
                    warn!(info_hash = %base, error = %e, "resurrection failed");
                    (base, Resurrection::Failed)
                }
            }
        });

        let mut summary = ResurrectionSummary::default();
        for (base, outcome) in join_all(tasks).await {
            match outcome {
                Resurrection::Resurrected => summary.resurrected.push(base),
                Resurrection::Pruned => summary.pruned.push(base),
                Resurrection::Skipped => summary.skipped.push(base),
                Resurrection::Failed => summary.failed.push(base),
            }
        }
        summary
    }

    // -- reconciliation ------------------------------------------------------

    /// Diff engine content against `server_photos`: stale local transfers
    /// are removed, missing ones added, and local ownership re-registered
    /// where the room lost it.
    pub async fn reconcile(&self, server_photos: &[PhotoRecord]) -> ReconcileSummary {
        let session = &self.session;
        let mut summary = ReconcileSummary::default();

        let on_server: HashSet<&str> = server_photos.iter().map(PhotoRecord::base_hash).collect();
        let stale: Vec<String> = session
            .engine
            .held_ids()
            .into_iter()
            .filter(|base| !on_server.contains(base.as_str()) && !self.additions.is_busy(base))
            .collect();
        let removals = stale.iter().map(|base| async move {
            let ids: Vec<String> = session
                .photos
                .for_base(base)
                .into_iter()
                .map(|p| p.info_hash)
                .collect();
            if ids.is_empty() {
                self.deletions.remove_local(base).await;
            }
            for id in ids {
                self.deletions.remove_local(&id).await;
            }
        });
        join_all(removals).await;
        if !stale.is_empty() {
            info!(count = stale.len(), "removed stale local transfers");
        }
        summary.removed = stale;

        self.additions.attach_held(server_photos);

        let mut seen = HashSet::new();
        let missing: Vec<&PhotoRecord> = server_photos
            .iter()
            .filter(|p| !p.is_placeholder())
            .filter(|p| !session.engine.holds(p.base_hash()))
            .filter(|p| seen.insert(p.base_hash().to_string()))
            .collect();
        let additions = missing.iter().map(|record| async move {
            let outcome = self
                .additions
                .add(&record.info_hash, Some((*record).clone()))
                .await;
            (record.base_hash().to_string(), outcome)
        });
        for (base, outcome) in join_all(additions).await {
            match outcome {
                Ok(AddOutcome::Added(_)) => summary.added.push(base),
                Ok(_) => {}
                Err(e) => warn!(info_hash = %base, error = %e, "could not add room item"),
            }
        }

        self.additions.retry_shares().await;
        summary.healed = self.heal_ownership().await;

        if !summary.added.is_empty() || !summary.removed.is_empty() {
            debug!(
                added = summary.added.len(),
                removed = summary.removed.len(),
                healed = summary.healed.len(),
                "reconciled with room"
            );
        }
        summary
    }

    /// Register the local peer as a complete owner of every fully local item
    /// whose owner list lacks it, in one call.
    async fn heal_ownership(&self) -> Vec<String> {
        let session = &self.session;
        let me = session.peer_id().clone();
        let owner = Owner::complete(me.clone());

        let changes: Vec<OwnerChange> = session
            .photos
            .snapshot()
            .iter()
            .filter(|p| !p.is_placeholder() && !p.is_loading() && !p.has_owner(&me))
            .filter(|p| session.engine.get(&p.info_hash).is_some_and(|h| h.is_done()))
            .map(|p| OwnerChange::new(p.info_hash.clone(), &owner))
            .collect();
        if changes.is_empty() {
            return Vec::new();
        }

        for change in &changes {
            session.photos.apply_owner(change, false);
        }
        let ids: Vec<String> = changes.iter().map(|c| c.info_hash.clone()).collect();

        if let Err(e) = session.room_api.add_owners(&session.room_id, &changes).await {
            warn!(items = ids.len(), error = %e, "ownership self-heal failed");
            for change in &changes {
                session.photos.apply_owner(change, true);
            }
            return Vec::new();
        }

        info!(items = ids.len(), "re-registered missing ownership");
        session.bus.emit(ContentEvent::OwnershipHealed {
            info_hashes: ids.clone(),
        });
        ids
    }

    /// The room's list as this peer last saw it, without local-only records.
    fn server_view(&self) -> Vec<PhotoRecord> {
        self.session
            .photos
            .snapshot()
            .iter()
            .filter(|p| !self.is_local_only(p))
            .cloned()
            .collect()
    }

    fn is_local_only(&self, record: &PhotoRecord) -> bool {
        record.is_placeholder() || self.additions.is_unshared(record.base_hash())
    }

    // -- push events ---------------------------------------------------------

    /// Open the push stream for this session.
    pub async fn subscribe(&self) -> Result<PushStream, ContentError> {
        let session = &self.session;
        let stream = session
            .room_api
            .subscribe(&session.room_id, &session.local_peer.session_id)
            .await?;
        Ok(stream)
    }

    /// Apply push events in order and reconcile periodically until the
    /// stream ends.
    pub async fn run(&self, mut push: PushStream) {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                event = push.next() => match event {
                    Some(Ok(event)) => self.apply_event(event).await,
                    Some(Err(e)) => warn!(error = %e, "dropping undecodable push event"),
                    None => {
                        info!(room = %self.session.room_id, "push stream closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.refresh().await,
            }
        }
    }

    pub async fn apply_event(&self, event: RoomEvent) {
        let session = &self.session;
        match event {
            RoomEvent::Photos(event) => {
                self.apply_photo_event(event).await;
                let view = self.server_view();
                self.reconcile(&view).await;
            }
            RoomEvent::Peers(event) => {
                if let PeerEvent::Delete(peer_id) = &event {
                    debug!(peer = %peer_id.short(), "peer left");
                }
                session.peers.apply(&event);
            }
            RoomEvent::Connections(connections) => session.peers.replace_connections(connections),
        }
    }

    async fn apply_photo_event(&self, event: PhotoEvent) {
        let photos = &self.session.photos;
        match event {
            PhotoEvent::All(list) => photos.sync_with(&list, |p| self.is_local_only(p)),
            PhotoEvent::Add(list) | PhotoEvent::Update(list) => {
                for remote in list {
                    match photos.get(&remote.info_hash) {
                        Some(local) => photos.upsert(local.merged_with(&remote)),
                        None => {
                            let info_hash = remote.info_hash.clone();
                            photos.upsert(remote);
                            self.session.bus.emit(ContentEvent::Added { info_hash });
                        }
                    }
                }
            }
            PhotoEvent::Delete(info_hash) => {
                if photos.get(&info_hash).is_some() {
                    self.deletions.remove_local(&info_hash).await;
                }
            }
            PhotoEvent::AddOwner(change) | PhotoEvent::UpdateOwner(change) => {
                photos.apply_owner(&change, false)
            }
            PhotoEvent::RemoveOwner(change) => photos.apply_owner(&change, true),
        }
    }

    /// Refetch the room snapshot and reconcile against it.
    pub async fn refresh(&self) {
        let session = &self.session;
        let room = match session.room_api.fetch_room(&session.room_id).await {
            Ok(room) => room,
            Err(e) => {
                warn!(room = %session.room_id, error = %e, "room refresh failed");
                return;
            }
        };
        session.peers.set_peers(room.peers);
        session.peers.replace_connections(room.connections);
        session
            .photos
            .sync_with(&room.photos, |p| self.is_local_only(p));
        self.reconcile(&room.photos).await;
    }

    // -- user actions --------------------------------------------------------

    pub async fn share(
        &self,
        files: Vec<SourceFile>,
        secure: bool,
        originals: Vec<SourceFile>,
    ) -> Result<Seeded, ContentError> {
        self.additions.seed(files, secure, originals).await
    }

    pub async fn delete(&self, info_hash: &str) -> String {
        self.deletions.delete_item(info_hash).await
    }

    pub fn sequential_download(&self) -> bool {
        self.additions.sequential()
    }

    /// Persist the download-order preference and use it for every transfer
    /// whose metadata arrives afterwards.
    pub fn set_sequential_download(&self, sequential: bool) -> Result<(), ContentError> {
        let store = &self.session.store;
        let mut prefs = store.preferences()?;
        prefs.sequential_download = sequential;
        store.save_preferences(&prefs)?;
        self.additions.set_sequential(sequential);
        info!(sequential, "download order changed");
        Ok(())
    }

    pub async fn leave_room(&self) -> Result<(), ContentError> {
        let session = &self.session;
        session
            .room_api
            .leave_room(&session.room_id, session.peer_id())
            .await?;
        info!(room = %session.room_id, "left room");
        Ok(())
    }

    /// Gather ICE candidates and report this peer's network chain once.
    pub async fn discover_topology(&self, gatherer: &dyn IceGatherer) {
        let session = &self.session;
        match self
            .discovery
            .run(gatherer, session.room_api.as_ref(), &session.room_id, session.peer_id())
            .await
        {
            Ok(Some(chain)) => debug!(hops = chain.len(), "network chain reported"),
            Ok(None) => debug!("network chain already reported"),
            Err(e) => warn!(error = %e, "topology discovery failed"),
        }
    }

    // -- render pipeline -----------------------------------------------------

    pub fn mark_rendering(&self, info_hash: &str) -> Result<PhotoRecord, ContentError> {
        self.advance(info_hash, PhotoState::Rendering)
    }

    pub fn mark_rendered(&self, info_hash: &str) -> Result<PhotoRecord, ContentError> {
        let record = self.advance(info_hash, PhotoState::Ready)?;
        self.session.bus.emit(ContentEvent::Rendered {
            info_hash: info_hash.to_string(),
        });
        Ok(record)
    }

    pub fn mark_render_failed(&self, info_hash: &str, reason: &str) -> Result<PhotoRecord, ContentError> {
        let record = self
            .session
            .photos
            .modify(info_hash, |p| p.fail(reason))
            .ok_or_else(|| ContentError::UnknownItem(info_hash.to_string()))?;
        self.session.bus.emit(ContentEvent::Failed {
            info_hash: info_hash.to_string(),
            reason: reason.to_string(),
        });
        Ok(record)
    }

    fn advance(&self, info_hash: &str, next: PhotoState) -> Result<PhotoRecord, ContentError> {
        match self.session.photos.try_modify(info_hash, |p| p.advance(next)) {
            Some(Ok(record)) => Ok(record),
            Some(Err(e)) => Err(e.into()),
            None => Err(ContentError::UnknownItem(info_hash.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use snapmesh_net::{MemoryRoom, RoomCall};
    use snapmesh_store::TransferDescriptor;

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::store::SqliteStore;
    use crate::testing::{file, Harness, ROOM};

    fn descriptor(info_hash: &str) -> TransferDescriptor {
        TransferDescriptor {
            info_hash: info_hash.to_string(),
            name: format!("{info_hash}.jpg"),
            secure: false,
            files: Vec::new(),
            payload: serde_json::json!({ "infoHash": info_hash }),
            created_at: Utc::now(),
        }
    }

    fn photo(id: &str) -> PhotoRecord {
        PhotoRecord::new(id, format!("{id}.jpg"), "image/jpeg", 3)
    }

    fn room_with(photos: &[&str]) -> Arc<MemoryRoom> {
        let mut room = Room::new(RoomId::from(ROOM));
        room.photos = photos.iter().map(|id| photo(id)).collect();
        Arc::new(MemoryRoom::with_room(room))
    }

    fn owner_adds(room: &MemoryRoom) -> Vec<Vec<OwnerChange>> {
        room.calls()
            .into_iter()
            .filter_map(|c| match c {
                RoomCall::AddOwners(changes) => Some(changes),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn join_creates_missing_room() {
        let memory = Arc::new(MemoryEngine::new());
        let harness = Harness::build(
            Arc::new(MemoryRoom::new()),
            memory.clone(),
            memory,
            Arc::new(SqliteStore::in_memory().unwrap()),
        );
        let room = harness.coordinator.join_room().await.unwrap();
        assert_eq!(room.peers.len(), 1);
        assert!(matches!(
            harness.room.calls().as_slice(),
            [RoomCall::JoinRoom(_), RoomCall::CreateRoom(_), ..]
        ));
    }

    #[tokio::test]
    async fn join_fails_when_server_unreachable() {
        let harness = Harness::new();
        harness.room.set_offline(true);
        let err = harness.coordinator.join_room().await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn reconcile_removes_stale_and_adds_missing() {
        let room = room_with(&["B", "C", "D"]);
        let memory = Arc::new(MemoryEngine::new());
        for id in ["A", "B", "C"] {
            memory.preload(id, vec![file(&format!("{id}.jpg"), &format!("{id}.jpg"))]);
        }
        let harness = Harness::build(
            room,
            memory.clone(),
            memory,
            Arc::new(SqliteStore::in_memory().unwrap()),
        );

        let server = vec![photo("B"), photo("C"), photo("D")];
        let summary = harness.coordinator.reconcile(&server).await;

        assert_eq!(summary.removed, vec!["A".to_string()]);
        assert_eq!(summary.added, vec!["D".to_string()]);
        assert_eq!(harness.engine.add_calls(), vec!["D".to_string()]);
        assert!(!harness.session.engine.holds("A"));
    }

    #[tokio::test]
    async fn unlisted_descriptor_is_pruned_not_added() {
        let room = room_with(&["B"]);
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.put(&descriptor("X")).unwrap();
        let memory = Arc::new(MemoryEngine::new());
        let harness = Harness::build(room, memory.clone(), memory, store);

        harness.coordinator.join_room().await.unwrap();

        assert!(!harness.session.store.has("X").unwrap());
        assert!(!harness.engine.add_calls().contains(&"X".to_string()));
    }

    #[tokio::test]
    async fn one_resurrection_failure_is_isolated() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        for id in ["X", "Y", "Z"] {
            store.put(&descriptor(id)).unwrap();
        }
        let memory = Arc::new(MemoryEngine::new());
        memory.fail_add("Y");
        let harness = Harness::build(room_with(&["X", "Y", "Z"]), memory.clone(), memory, store);

        let server = vec![photo("X"), photo("Y"), photo("Z")];
        let mut summary = harness.coordinator.resurrect(&server).await;
        summary.resurrected.sort();

        assert_eq!(summary.resurrected, vec!["X".to_string(), "Z".to_string()]);
        assert_eq!(summary.failed, vec!["Y".to_string()]);
        assert!(harness.session.photos.get("X").is_some_and(|p| p.from_cache));
    }

    #[tokio::test]
    async fn resurrection_skips_held_transfers() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.put(&descriptor("X")).unwrap();
        let memory = Arc::new(MemoryEngine::new());
        memory.preload("X", vec![file("X.jpg", "X.jpg")]);
        let harness = Harness::build(room_with(&["X"]), memory.clone(), memory, store);

        let summary = harness.coordinator.resurrect(&[photo("X")]).await;
        assert_eq!(summary.skipped, vec!["X".to_string()]);
        assert!(harness.engine.add_calls().is_empty());
    }

    #[tokio::test]
    async fn missing_ownership_is_healed_in_one_call() {
        let memory = Arc::new(MemoryEngine::new());
        memory.preload("H", vec![file("H.jpg", "H.jpg")]);
        let harness = Harness::build(
            room_with(&["H"]),
            memory.clone(),
            memory,
            Arc::new(SqliteStore::in_memory().unwrap()),
        );

        harness.coordinator.join_room().await.unwrap();

        let adds = owner_adds(&harness.room);
        assert_eq!(adds.len(), 1);
        assert_eq!(adds[0].len(), 1);
        assert_eq!(adds[0][0].info_hash, "H");
        let me = harness.coordinator.local_peer().peer_id.clone();
        let server = harness.room.room(&RoomId::from(ROOM)).unwrap();
        assert!(server.photo("H").unwrap().has_owner(&me));

        // A second pass finds nothing to heal.
        let view = harness.coordinator.server_view();
        harness.coordinator.reconcile(&view).await;
        assert_eq!(owner_adds(&harness.room).len(), 1);
    }

    #[tokio::test]
    async fn pushed_items_are_added() {
        let harness = Harness::new();
        harness.swarm_publish("D", &[("d.jpg", "ddd")]);
        harness.coordinator.join_room().await.unwrap();

        harness
            .coordinator
            .apply_event(RoomEvent::Photos(PhotoEvent::Add(vec![photo("D")])))
            .await;
        assert_eq!(harness.engine.add_calls(), vec!["D".to_string()]);

        harness
            .coordinator
            .apply_event(RoomEvent::Photos(PhotoEvent::Delete("D".to_string())))
            .await;
        assert!(harness.coordinator.photos().is_empty());
        assert!(!harness.session.engine.holds("D"));
    }

    #[tokio::test]
    async fn render_pipeline_drives_lifecycle() {
        let harness = Harness::new();
        assert!(matches!(
            harness.coordinator.mark_rendering("nope"),
            Err(ContentError::UnknownItem(_))
        ));

        let mut record = photo("R");
        record.advance(PhotoState::MetadataBound).unwrap();
        harness.session.photos.upsert(record);

        harness.coordinator.mark_rendering("R").unwrap();
        let ready = harness.coordinator.mark_rendered("R").unwrap();
        assert_eq!(ready.state, PhotoState::Ready);
        assert!(matches!(
            harness.coordinator.mark_rendering("R"),
            Err(ContentError::Lifecycle(_))
        ));
    }
}
