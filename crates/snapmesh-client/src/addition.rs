//! Getting content into the engine.
//!
//! Remote items are added by identifier, local files are seeded. Either way
//! a background task waits for metadata, binds records to engine files,
//! persists the transfer descriptor and registers this peer as an owner,
//! then follows the transfer for progress, completion and wires.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use snapmesh_shared::content_id;
use snapmesh_shared::protocol::OwnerChange;
use snapmesh_shared::{Owner, PhotoRecord, PhotoState};
use snapmesh_store::{DescriptorFile, TransferDescriptor};

use crate::engine::{
    AddOptions, DownloadStrategy, EngineError, EngineFile, SeedOptions, SourceFile,
    TransferEvent, TransferHandle, TransferState,
};
use crate::error::ContentError;
use crate::events::ContentEvent;
use crate::session::Session;
use crate::thumbnail::{wants_thumbnail, ThumbnailExtractor, THUMBNAIL_MIME};
use crate::throttle::Throttle;

/// Result of asking for an identifier to be added.
#[derive(Debug, Clone)]
pub enum AddOutcome {
    Added(TransferHandle),
    /// The engine already holds the transfer; nothing was started.
    AlreadyPresent(TransferHandle),
    /// Another add of the same base identifier has not returned yet.
    InFlight,
}

impl AddOutcome {
    pub fn handle(&self) -> Option<&TransferHandle> {
        match self {
            AddOutcome::Added(h) | AddOutcome::AlreadyPresent(h) => Some(h),
            AddOutcome::InFlight => None,
        }
    }
}

/// Result of a local upload.
#[derive(Debug, Clone)]
pub struct Seeded {
    pub handle: TransferHandle,
    /// Item identifiers now representing the upload.
    pub info_hashes: Vec<String>,
    /// Set when the engine already held identical content under this base.
    pub duplicate_of: Option<String>,
}

pub struct AdditionManager {
    session: Arc<Session>,
    thumbnails: Arc<dyn ThumbnailExtractor>,
    /// Download order for transfers without streamable files.
    sequential: AtomicBool,
    progress_interval: Duration,
    /// Bases whose add, or fresh seed, has not settled yet.
    in_flight: Mutex<HashSet<String>>,
    /// Seeded transfers the server has not accepted yet.
    unshared: Mutex<HashSet<String>>,
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AdditionManager {
    pub fn new(
        session: Arc<Session>,
        thumbnails: Arc<dyn ThumbnailExtractor>,
        sequential: bool,
        progress_interval: Duration,
    ) -> Self {
        Self {
            session,
            thumbnails,
            sequential: AtomicBool::new(sequential),
            progress_interval,
            in_flight: Mutex::new(HashSet::new()),
            unshared: Mutex::new(HashSet::new()),
        }
    }

    pub fn sequential(&self) -> bool {
        self.sequential.load(Ordering::Relaxed)
    }

    /// Applies to transfers whose metadata arrives from now on.
    pub fn set_sequential(&self, sequential: bool) {
        self.sequential.store(sequential, Ordering::Relaxed);
    }

    pub fn is_in_flight(&self, base: &str) -> bool {
        lock(&self.in_flight).contains(base)
    }

    pub fn is_unshared(&self, base: &str) -> bool {
        lock(&self.unshared).contains(base)
    }

    /// Whether reconciliation must leave `base` alone for now.
    pub fn is_busy(&self, base: &str) -> bool {
        self.is_in_flight(base) || self.is_unshared(base)
    }

    // -- remote items --------------------------------------------------------

    /// Add the item `id` (bare or compound) to the engine.
    ///
    /// `record` is the server's record for the item, when known.
    pub async fn add(
        self: &Arc<Self>,
        id: &str,
        record: Option<PhotoRecord>,
    ) -> Result<AddOutcome, ContentError> {
        self.add_transfer(id, record, None).await
    }

    /// Re-attach the engine to a transfer persisted by an earlier session.
    pub async fn resurrect(
        self: &Arc<Self>,
        descriptor: TransferDescriptor,
        listed: Vec<PhotoRecord>,
    ) -> Result<AddOutcome, ContentError> {
        let info_hash = descriptor.info_hash.clone();
        for record in listed {
            let record = PhotoRecord {
                from_cache: true,
                ..record
            };
            let merged = match self.session.photos.get(&record.info_hash) {
                Some(local) => PhotoRecord {
                    from_cache: true,
                    ..local.merged_with(&record)
                },
                None => record,
            };
            self.session.photos.upsert(merged);
        }

        self.add_transfer(&info_hash, None, Some(descriptor.payload))
            .await
            .map_err(|e| ContentError::Resurrection {
                info_hash,
                reason: e.to_string(),
            })
    }

    async fn add_transfer(
        self: &Arc<Self>,
        id: &str,
        record: Option<PhotoRecord>,
        payload: Option<serde_json::Value>,
    ) -> Result<AddOutcome, ContentError> {
        let base = content_id::base_hash(id).to_string();
        let session = &self.session;

        if let Some(handle) = session.engine.get(&base) {
            debug!(info_hash = %base, "engine already holds transfer");
            return Ok(AddOutcome::AlreadyPresent(handle));
        }
        if !lock(&self.in_flight).insert(base.clone()) {
            debug!(info_hash = %base, "add already in flight");
            return Ok(AddOutcome::InFlight);
        }

        let mut secure = session.photos.for_base(&base).iter().any(|p| p.secure);
        if let Some(record) = record {
            secure |= record.secure;
            if session.photos.get(&record.info_hash).is_none() {
                let info_hash = record.info_hash.clone();
                session.photos.upsert(record);
                session.bus.emit(ContentEvent::Added { info_hash });
            }
        }

        let opts = AddOptions {
            secure,
            descriptor: payload,
        };
        let result = session.engine.add(&base, opts).await;
        lock(&self.in_flight).remove(&base);

        let handle = match result {
            Ok(handle) => handle,
            Err(EngineError::Duplicate(existing)) => {
                debug!(info_hash = %base, existing = %existing, "engine reported duplicate add");
                session.bus.emit(ContentEvent::Duplicate {
                    placeholder: id.to_string(),
                    existing: existing.clone(),
                });
                return session
                    .engine
                    .get(&existing)
                    .map(AddOutcome::AlreadyPresent)
                    .ok_or(ContentError::Engine(EngineError::NotFound(existing)));
            }
            Err(e) => {
                warn!(info_hash = %base, error = %e, "engine add failed");
                return Err(e.into());
            }
        };

        info!(info_hash = %base, "transfer added");
        let this = Arc::clone(self);
        let watched = handle.clone();
        tokio::spawn(async move { this.watch_transfer(base, watched).await });
        Ok(AddOutcome::Added(handle))
    }

    async fn watch_transfer(self: Arc<Self>, base: String, handle: TransferHandle) {
        let files = match handle.wait_metadata().await {
            Ok(files) => files,
            Err(e) => {
                let ids: Vec<String> = self
                    .session
                    .photos
                    .for_base(&base)
                    .into_iter()
                    .map(|p| p.info_hash)
                    .collect();
                warn!(info_hash = %base, error = %e, "transfer ended before metadata");
                self.fail(&ids, &e.to_string());
                return;
            }
        };

        if handle.state().closed {
            debug!(info_hash = %base, "transfer removed before metadata was bound");
            return;
        }

        let ids = self.bind(&base, &files);
        self.persist(&base, &handle, &files);
        self.register_ownership(&ids).await;

        if !files.iter().any(EngineFile::is_streamable) {
            let strategy = DownloadStrategy::from_preference(self.sequential());
            debug!(info_hash = %base, ?strategy, "no streamable files");
            handle.set_strategy(strategy);
        }

        self.follow(base, ids, handle, false).await;
    }

    /// Bind every known record of `base` to a file of the transfer. Records
    /// are derived from the file list when none are known yet.
    pub fn bind(&self, base: &str, files: &[EngineFile]) -> Vec<String> {
        let photos = &self.session.photos;
        let mut records = photos.for_base(base);

        if records.is_empty() {
            let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            for (path, id) in content_id::assign_ids(base, &paths) {
                if let Some(file) = files.iter().find(|f| f.path == path) {
                    let record = PhotoRecord::new(id, &file.name, &file.mime, file.length);
                    photos.upsert(record.clone());
                    self.session.bus.emit(ContentEvent::Added {
                        info_hash: record.info_hash.clone(),
                    });
                    records.push(record);
                }
            }
        }

        let mut bound = Vec::new();
        for record in records {
            let Some(file) = bind_file(&record, files) else {
                warn!(info_hash = %record.info_hash, "no file in transfer matches record");
                continue;
            };
            let path = file.path.clone();
            let length = file.length;
            let mime = file.mime.clone();

            let outcome = photos.try_modify(&record.info_hash, |p| {
                p.advance(PhotoState::MetadataBound)?;
                p.bound_file = Some(path);
                if p.file_size == 0 {
                    p.file_size = length;
                }
                if p.file_type.is_empty() {
                    p.file_type = mime;
                }
                Ok::<(), snapmesh_shared::LifecycleError>(())
            });
            match outcome {
                Some(Ok(p)) => {
                    debug!(info_hash = %p.info_hash, file = ?p.bound_file, "record bound");
                    self.session.bus.emit(ContentEvent::Ready {
                        info_hash: p.info_hash.clone(),
                    });
                    bound.push(p.info_hash);
                }
                Some(Err(e)) => debug!(error = %e, "record not bindable"),
                None => {}
            }
        }
        bound
    }

    /// Bind server records whose transfer the engine already holds, e.g.
    /// content kept from an earlier join.
    pub fn attach_held(&self, server: &[PhotoRecord]) {
        let mut seen = HashSet::new();
        for record in server {
            let base = record.base_hash();
            if record.state != PhotoState::Added || !seen.insert(base.to_string()) {
                continue;
            }
            let Some(files) = self.session.engine.get(base).and_then(|h| h.files()) else {
                continue;
            };
            self.bind(base, &files);
        }
    }

    fn persist(&self, base: &str, handle: &TransferHandle, files: &[EngineFile]) {
        let store = &self.session.store;
        match store.has(base) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => warn!(info_hash = %base, error = %e, "descriptor lookup failed"),
        }

        let secure = self.session.photos.for_base(base).iter().any(|p| p.secure);
        let name = files
            .iter()
            .find(|f| !f.is_thumbnail())
            .map(|f| f.name.clone())
            .unwrap_or_else(|| base.to_string());
        let descriptor = TransferDescriptor {
            info_hash: base.to_string(),
            name,
            secure,
            files: files
                .iter()
                .map(|f| DescriptorFile {
                    path: f.path.clone(),
                    name: f.name.clone(),
                    length: f.length,
                    mime: f.mime.clone(),
                })
                .collect(),
            payload: handle.payload().unwrap_or(serde_json::Value::Null),
            created_at: Utc::now(),
        };

        match store.put(&descriptor) {
            Ok(true) => debug!(info_hash = %base, "descriptor stored"),
            Ok(false) => {}
            Err(e) => warn!(info_hash = %base, error = %e, "failed to store descriptor"),
        }
    }

    async fn register_ownership(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let me = self.session.peer_id().clone();
        let changes: Vec<OwnerChange> = ids
            .iter()
            .map(|id| OwnerChange::new(id.clone(), &Owner::loading(me.clone())))
            .collect();
        for change in &changes {
            self.session.photos.apply_owner(change, false);
        }

        let api = &self.session.room_api;
        if let Err(e) = api.add_owners(&self.session.room_id, &changes).await {
            warn!(items = ids.len(), error = %e, "failed to register ownership");
        }
    }

    // -- following a transfer ------------------------------------------------

    async fn follow(
        self: Arc<Self>,
        base: String,
        ids: Vec<String>,
        handle: TransferHandle,
        mut completed: bool,
    ) {
        let me = self.session.peer_id().clone();
        let mut events = handle.subscribe();
        let mut state = handle.watch();
        let mut throttle = Throttle::new(self.progress_interval);
        let mut download_speed = 0;
        let mut upload_speed = 0;

        // Wires opened before we subscribed.
        self.session.peers.connect(&handle, &me);
        if !completed && handle.is_done() {
            completed = true;
            self.complete(&ids).await;
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(TransferEvent::Wire(wire)) => {
                        self.session.peers.report_wire(&base, &me, &wire);
                    }
                    Ok(TransferEvent::Download { progress, speed }) => {
                        download_speed = speed;
                        if !completed && throttle.ready() {
                            self.report_progress(&ids, progress, download_speed, upload_speed).await;
                        }
                    }
                    Ok(TransferEvent::Upload { speed }) => {
                        upload_speed = speed;
                        if throttle.ready() {
                            let progress = if completed { 1.0 } else { 0.0 };
                            self.emit_progress(&ids, progress, download_speed, upload_speed);
                        }
                    }
                    Ok(TransferEvent::Done) => {
                        if !completed {
                            completed = true;
                            self.complete(&ids).await;
                        }
                    }
                    Ok(TransferEvent::Error(e)) if e.is_transient() => {
                        debug!(info_hash = %base, error = %e, "ignoring transient engine error");
                    }
                    Ok(TransferEvent::Error(e)) => {
                        warn!(info_hash = %base, error = %e, "transfer failed");
                        self.fail(&ids, &e.to_string());
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(info_hash = %base, skipped, "transfer events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = closed(&mut state) => {
                    debug!(info_hash = %base, "transfer removed from engine");
                    break;
                }
            }
        }
    }

    fn emit_progress(&self, ids: &[String], progress: f64, download_speed: u64, upload_speed: u64) {
        for id in ids {
            self.session.bus.emit(ContentEvent::Progress {
                info_hash: id.clone(),
                progress,
                download_speed,
                upload_speed,
            });
        }
    }

    async fn report_progress(
        &self,
        ids: &[String],
        progress: f64,
        download_speed: u64,
        upload_speed: u64,
    ) {
        self.emit_progress(ids, progress, download_speed, upload_speed);

        let me = self.session.peer_id().clone();
        let owner = Owner {
            peer_id: me,
            loading: true,
            progress,
        };
        let changes = self.owner_changes(ids, &owner);
        let api = &self.session.room_api;
        if let Err(e) = api.update_owners(&self.session.room_id, &changes).await {
            debug!(error = %e, "progress report failed");
        }
    }

    async fn complete(&self, ids: &[String]) {
        let owner = Owner::complete(self.session.peer_id().clone());
        let changes = self.owner_changes(ids, &owner);
        for change in &changes {
            self.session.photos.apply_owner(change, false);
            self.session.bus.emit(ContentEvent::Completed {
                info_hash: change.info_hash.clone(),
            });
        }
        if changes.is_empty() {
            return;
        }

        let api = &self.session.room_api;
        if let Err(e) = api.update_owners(&self.session.room_id, &changes).await {
            warn!(items = ids.len(), error = %e, "failed to report completion");
        }
    }

    fn owner_changes(&self, ids: &[String], owner: &Owner) -> Vec<OwnerChange> {
        ids.iter()
            .map(|id| OwnerChange::new(id.clone(), owner))
            .collect()
    }

    fn fail(&self, ids: &[String], reason: &str) {
        for id in ids {
            self.session.photos.modify(id, |p| p.fail(reason));
            self.session.bus.emit(ContentEvent::Failed {
                info_hash: id.clone(),
                reason: reason.to_string(),
            });
        }
    }

    // -- local uploads -------------------------------------------------------

    /// Seed `files` and share the resulting records with the room.
    ///
    /// `originals` are the user's files when `files` is an encrypted bundle
    /// of them; records and thumbnails are made from the originals.
    pub async fn seed(
        self: &Arc<Self>,
        files: Vec<SourceFile>,
        secure: bool,
        originals: Vec<SourceFile>,
    ) -> Result<Seeded, ContentError> {
        if files.is_empty() || files.iter().all(SourceFile::is_empty) {
            return Err(ContentError::NoInput);
        }
        let session = &self.session;

        let described = if originals.is_empty() { &files } else { &originals };
        let placeholders: Vec<PhotoRecord> = described
            .iter()
            .filter(|f| !content_id::is_thumbnail(&f.name))
            .map(|f| PhotoRecord::placeholder(&f.name, &f.mime, f.len(), secure))
            .collect();
        for placeholder in &placeholders {
            session.photos.upsert(placeholder.clone());
            session.bus.emit(ContentEvent::Added {
                info_hash: placeholder.info_hash.clone(),
            });
        }

        let mut thumbnails = Vec::new();
        if !secure {
            for original in described.iter().filter(|f| wants_thumbnail(&f.mime)) {
                match self.thumbnails.extract(original).await {
                    Ok(Some(bytes)) => thumbnails.push(SourceFile::new(
                        content_id::thumbnail_name(&original.name),
                        THUMBNAIL_MIME,
                        bytes,
                    )),
                    Ok(None) => {}
                    Err(e) => warn!(file = %original.name, error = %e, "thumbnail skipped"),
                }
            }
        }

        let mut bundle = files;
        bundle.extend(thumbnails);
        let opts = SeedOptions {
            name: placeholders
                .first()
                .map(|p| p.file_name.clone())
                .unwrap_or_default(),
            secure,
        };

        let handle = match session.engine.seed(bundle, opts).await {
            Ok(handle) => handle,
            Err(EngineError::Duplicate(existing)) => {
                return self.merge_duplicate(&placeholders, existing);
            }
            Err(e) => return Err(self.upload_failed(&placeholders, e.to_string())),
        };

        let base = match handle.wait_info_hash().await {
            Ok(base) => base,
            Err(e) => return Err(self.upload_failed(&placeholders, e.to_string())),
        };
        // The engine lists the transfer from here on. Reconciliation must
        // leave it alone until its records are bound and queued for sharing.
        lock(&self.in_flight).insert(base.clone());
        let engine_files = match handle.wait_metadata().await {
            Ok(files) => files,
            Err(e) => {
                lock(&self.in_flight).remove(&base);
                return Err(self.upload_failed(&placeholders, e.to_string()));
            }
        };
        info!(info_hash = %base, files = engine_files.len(), secure, "seeded local files");

        let records = self.bind_placeholders(&base, &engine_files, placeholders, secure);
        self.persist(&base, &handle, &engine_files);
        lock(&self.unshared).insert(base.clone());
        lock(&self.in_flight).remove(&base);
        let ids: Vec<String> = records.iter().map(|r| r.info_hash.clone()).collect();

        let this = Arc::clone(self);
        let followed = handle.clone();
        let follow_ids = ids.clone();
        let follow_base = base.clone();
        tokio::spawn(async move { this.follow(follow_base, follow_ids, followed, true).await });

        if let Err(e) = session.room_api.share_photos(&session.room_id, &records).await {
            let reason = e.to_string();
            warn!(info_hash = %base, error = %reason, "server rejected shared items");
            self.mark_upload_error(&ids, &reason);
            return Err(ContentError::Upload {
                info_hash: base,
                reason,
            });
        }
        lock(&self.unshared).remove(&base);

        Ok(Seeded {
            handle,
            info_hashes: ids,
            duplicate_of: None,
        })
    }

    /// Give each placeholder the identifier of its engine file.
    ///
    /// A secure transfer is one encrypted bundle, so every placeholder binds
    /// to that file. With several originals each record is told apart by a
    /// compound id on its original's name.
    fn bind_placeholders(
        &self,
        base: &str,
        files: &[EngineFile],
        placeholders: Vec<PhotoRecord>,
        secure: bool,
    ) -> Vec<PhotoRecord> {
        let mut remaining = placeholders;
        let mut records = Vec::new();

        if secure {
            let bundle = files.iter().find(|f| !f.is_thumbnail()).or_else(|| files.first());
            if let Some(bundle) = bundle {
                let many = remaining.len() > 1;
                for record in std::mem::take(&mut remaining) {
                    let id = if many {
                        content_id::compound(base, &record.file_name)
                    } else {
                        base.to_string()
                    };
                    records.extend(self.bind_placeholder(record, id, bundle));
                }
            }
        } else {
            let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            for (path, id) in content_id::assign_ids(base, &paths) {
                let Some(file) = files.iter().find(|f| f.path == path) else {
                    continue;
                };
                let index = remaining
                    .iter()
                    .position(|p| p.file_name == file.name)
                    .or(if remaining.is_empty() { None } else { Some(0) });
                let record = match index {
                    Some(i) => remaining.remove(i),
                    None => PhotoRecord::placeholder(&file.name, &file.mime, file.length, false),
                };
                records.extend(self.bind_placeholder(record, id, file));
            }
        }

        for leftover in remaining {
            self.session
                .photos
                .modify(&leftover.info_hash, |p| p.fail("no matching file in transfer"));
            self.session.bus.emit(ContentEvent::UploadFailed {
                info_hash: leftover.info_hash,
                reason: "no matching file in transfer".to_string(),
            });
        }
        records
    }

    /// Swap a placeholder for its bound record under `id`.
    fn bind_placeholder(&self, mut record: PhotoRecord, id: String, file: &EngineFile) -> Option<PhotoRecord> {
        let session = &self.session;
        let placeholder_id = std::mem::replace(&mut record.info_hash, id);
        if let Err(e) = record.advance(PhotoState::MetadataBound) {
            warn!(error = %e, "placeholder not bindable");
            return None;
        }
        record.bound_file = Some(file.path.clone());
        if record.file_size == 0 {
            record.file_size = file.length;
        }
        record.owners = vec![Owner::complete(session.peer_id().clone())];

        let bound = record.clone();
        session.photos.update(|current| {
            let mut next: Vec<PhotoRecord> = current
                .iter()
                .filter(|p| p.info_hash != placeholder_id && p.info_hash != bound.info_hash)
                .cloned()
                .collect();
            next.push(bound);
            next
        });
        session.bus.emit(ContentEvent::Ready {
            info_hash: record.info_hash.clone(),
        });
        Some(record)
    }

    fn merge_duplicate(
        &self,
        placeholders: &[PhotoRecord],
        existing: String,
    ) -> Result<Seeded, ContentError> {
        let session = &self.session;
        for placeholder in placeholders {
            session.photos.remove(&placeholder.info_hash);
            session.bus.emit(ContentEvent::Duplicate {
                placeholder: placeholder.info_hash.clone(),
                existing: existing.clone(),
            });
        }
        info!(info_hash = %existing, "upload is already held, merged");

        let handle = session
            .engine
            .get(&existing)
            .ok_or_else(|| ContentError::Engine(EngineError::NotFound(existing.clone())))?;
        let mut info_hashes: Vec<String> = session
            .photos
            .for_base(&existing)
            .into_iter()
            .map(|p| p.info_hash)
            .collect();
        if info_hashes.is_empty() {
            info_hashes.push(existing.clone());
        }
        Ok(Seeded {
            handle,
            info_hashes,
            duplicate_of: Some(existing),
        })
    }

    fn upload_failed(&self, placeholders: &[PhotoRecord], reason: String) -> ContentError {
        warn!(files = placeholders.len(), error = %reason, "seeding failed");
        for placeholder in placeholders {
            self.session
                .photos
                .modify(&placeholder.info_hash, |p| p.fail(reason.as_str()));
            self.session.bus.emit(ContentEvent::UploadFailed {
                info_hash: placeholder.info_hash.clone(),
                reason: reason.clone(),
            });
        }
        ContentError::Upload {
            info_hash: placeholders
                .first()
                .map(|p| p.info_hash.clone())
                .unwrap_or_default(),
            reason,
        }
    }

    /// Attach the share error to records without changing their state.
    fn mark_upload_error(&self, ids: &[String], reason: &str) {
        for id in ids {
            self.session
                .photos
                .modify(id, |p| p.upload_error = Some(reason.to_string()));
            self.session.bus.emit(ContentEvent::UploadFailed {
                info_hash: id.clone(),
                reason: reason.to_string(),
            });
        }
    }

    /// Share again every seeded transfer the server has not accepted yet.
    /// Returns how many were accepted.
    pub async fn retry_shares(&self) -> usize {
        let pending: Vec<String> = lock(&self.unshared).iter().cloned().collect();
        let mut accepted = 0;

        for base in pending {
            if !self.session.engine.holds(&base) {
                lock(&self.unshared).remove(&base);
                continue;
            }
            let records: Vec<PhotoRecord> = self
                .session
                .photos
                .for_base(&base)
                .into_iter()
                .map(|p| PhotoRecord {
                    upload_error: None,
                    ..p
                })
                .collect();
            if records.is_empty() {
                lock(&self.unshared).remove(&base);
                continue;
            }

            let api = &self.session.room_api;
            match api.share_photos(&self.session.room_id, &records).await {
                Ok(()) => {
                    for record in &records {
                        self.session
                            .photos
                            .modify(&record.info_hash, |p| p.upload_error = None);
                    }
                    lock(&self.unshared).remove(&base);
                    info!(info_hash = %base, "shared after retry");
                    accepted += 1;
                }
                Err(e) => debug!(info_hash = %base, error = %e, "share retry failed"),
            }
        }
        accepted
    }
}

/// Pick the engine file a record stands for.
///
/// Secure records always take the single bundle file. Otherwise the
/// compound path wins, then an exact name match, then the first original.
pub fn bind_file<'a>(record: &PhotoRecord, files: &'a [EngineFile]) -> Option<&'a EngineFile> {
    let mut originals = files.iter().filter(|f| !f.is_thumbnail());
    if record.secure {
        return originals.next().or_else(|| files.first());
    }
    if let Some(path) = content_id::file_path(&record.info_hash) {
        if let Some(file) = files.iter().find(|f| f.path == path) {
            return Some(file);
        }
    }
    files
        .iter()
        .find(|f| !f.is_thumbnail() && f.name == record.file_name)
        .or_else(|| originals.next())
}

async fn closed(state: &mut watch::Receiver<TransferState>) {
    let _ = state.wait_for(|s| s.closed).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use snapmesh_net::RoomCall;

    use super::*;
    use crate::engine::{ContentEngine, MemoryEngine};
    use crate::testing::{file, wait_for_event, Harness};

    #[test]
    fn bind_file_fallback_chain() {
        let files = vec![
            file("album/a.jpg", "a.jpg"),
            file("album/thumbnail-a.jpg", "thumbnail-a.jpg"),
            file("album/b.jpg", "b.jpg"),
        ];

        let by_path = PhotoRecord::new("h1-album/b.jpg", "other.jpg", "image/jpeg", 1);
        assert_eq!(bind_file(&by_path, &files).unwrap().path, "album/b.jpg");

        let by_name = PhotoRecord::new("h1", "b.jpg", "image/jpeg", 1);
        assert_eq!(bind_file(&by_name, &files).unwrap().path, "album/b.jpg");

        let fallback = PhotoRecord::new("h1", "z.jpg", "image/jpeg", 1);
        assert_eq!(bind_file(&fallback, &files).unwrap().path, "album/a.jpg");

        let secure = PhotoRecord {
            secure: true,
            ..PhotoRecord::new("h1-album/b.jpg", "b.jpg", "image/jpeg", 1)
        };
        assert_eq!(bind_file(&secure, &files).unwrap().path, "album/a.jpg");
    }

    #[tokio::test]
    async fn adding_twice_registers_once() {
        let harness = Harness::new();
        harness.swarm_publish("h1", &[("a.jpg", "abc")]);
        let mut bus = harness.session.bus.subscribe();

        let first = harness.additions.add("h1", None).await.unwrap();
        assert!(matches!(first, AddOutcome::Added(_)));
        let second = harness.additions.add("h1", None).await.unwrap();
        assert!(matches!(second, AddOutcome::AlreadyPresent(_)));

        wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Completed { .. })).await;
        assert_eq!(harness.engine.add_calls(), vec!["h1".to_string()]);
        let registrations = harness
            .room
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RoomCall::AddOwners(_)))
            .count();
        assert_eq!(registrations, 1);

        let record = harness.session.photos.get("h1").unwrap();
        assert_eq!(record.state, PhotoState::MetadataBound);
        assert_eq!(record.bound_file.as_deref(), Some("a.jpg"));
        assert!(record.owner(harness.session.peer_id()).is_some_and(|o| !o.loading));
    }

    #[tokio::test]
    async fn concurrent_add_is_in_flight() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let memory = Arc::new(MemoryEngine::new());
        let gated = GatedEngine {
            inner: memory.clone(),
            gate: gate.clone(),
        };
        let harness = Harness::with_engine(memory, Arc::new(gated));

        let additions = harness.additions.clone();
        let first = tokio::spawn(async move { additions.add("h1", None).await });
        tokio::task::yield_now().await;

        let second = harness.additions.add("h1", None).await.unwrap();
        assert!(matches!(second, AddOutcome::InFlight));

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, AddOutcome::Added(_)));
        assert!(!harness.additions.is_in_flight("h1"));
    }

    #[tokio::test]
    async fn records_derived_from_bundle_get_compound_ids() {
        let harness = Harness::new();
        harness.swarm_publish(
            "h2",
            &[("b/a.jpg", "a"), ("b/thumbnail-a.jpg", "t"), ("b/c.jpg", "c")],
        );
        let mut bus = harness.session.bus.subscribe();

        harness.additions.add("h2", None).await.unwrap();
        wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Completed { .. })).await;

        let mut ids: Vec<String> = harness
            .session
            .photos
            .for_base("h2")
            .into_iter()
            .map(|p| p.info_hash)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["h2-b/a.jpg", "h2-b/c.jpg"]);
        assert!(harness.session.store.has("h2").unwrap());
    }

    #[tokio::test]
    async fn seeding_replaces_placeholders_and_shares() {
        let harness = Harness::new();
        let seeded = harness
            .additions
            .seed(
                vec![SourceFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"abc"))],
                false,
                Vec::new(),
            )
            .await
            .unwrap();

        assert_eq!(seeded.info_hashes.len(), 1);
        let id = &seeded.info_hashes[0];
        let snapshot = harness.session.photos.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(&snapshot[0].info_hash, id);
        assert!(snapshot[0].owner(harness.session.peer_id()).is_some_and(|o| !o.loading));

        let room = harness.room.room(&harness.session.room_id).unwrap();
        assert!(room.photo(id).is_some());
        assert!(!harness.additions.is_unshared(id));
    }

    #[tokio::test]
    async fn seeding_known_content_merges_into_existing() {
        let harness = Harness::new();
        let files = || vec![SourceFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"abc"))];
        let first = harness.additions.seed(files(), false, Vec::new()).await.unwrap();
        let mut bus = harness.session.bus.subscribe();

        let second = harness.additions.seed(files(), false, Vec::new()).await.unwrap();
        let base = first.handle.info_hash().unwrap();
        assert_eq!(second.duplicate_of.as_deref(), Some(base.as_str()));
        assert_eq!(second.info_hashes, first.info_hashes);
        assert!(harness.session.photos.snapshot().iter().all(|p| !p.is_placeholder()));

        let event = wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Duplicate { .. })).await;
        assert!(matches!(event, ContentEvent::Duplicate { existing, .. } if existing == base));
    }

    #[tokio::test]
    async fn rejected_share_keeps_item_for_retry() {
        let harness = Harness::new();
        harness.room.fail_shares(true);

        let err = harness
            .additions
            .seed(
                vec![SourceFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"abc"))],
                false,
                Vec::new(),
            )
            .await
            .unwrap_err();
        let ContentError::Upload { info_hash, .. } = err else {
            panic!("expected upload error, got {err:?}");
        };
        let record = harness.session.photos.get(&info_hash).unwrap();
        assert_eq!(record.state, PhotoState::MetadataBound);
        assert!(record.upload_error.is_some());
        assert!(harness.additions.is_unshared(&info_hash));

        harness.room.fail_shares(false);
        assert_eq!(harness.additions.retry_shares().await, 1);
        assert!(harness.session.photos.get(&info_hash).unwrap().upload_error.is_none());
        assert!(!harness.additions.is_unshared(&info_hash));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let harness = Harness::new();
        let err = harness
            .additions
            .seed(vec![SourceFile::new("a.jpg", "image/jpeg", Bytes::new())], false, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::NoInput));
        assert!(harness.session.photos.snapshot().is_empty());
    }

    fn jpeg(name: &str, data: &'static [u8]) -> SourceFile {
        SourceFile::new(name, "image/jpeg", Bytes::from_static(data))
    }

    #[tokio::test]
    async fn upload_waiting_for_metadata_survives_reconcile() {
        let pending = TransferHandle::new();
        let memory = Arc::new(MemoryEngine::new());
        let slow = SlowSeedEngine {
            inner: memory.clone(),
            pending: pending.clone(),
        };
        let harness = Harness::with_engine(memory, Arc::new(slow));

        let additions = harness.additions.clone();
        let upload = tokio::spawn(async move {
            additions.seed(vec![jpeg("a.jpg", b"abc")], false, Vec::new()).await
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !harness.additions.is_in_flight("S") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("seed never minted its identifier");

        let summary = harness.coordinator.reconcile(&[]).await;
        assert!(summary.removed.is_empty());
        assert!(harness.session.engine.holds("S"));

        pending.set_metadata(vec![file("a.jpg", "a.jpg")], serde_json::Value::Null);
        pending.mark_done();
        let seeded = upload.await.unwrap().unwrap();
        assert_eq!(seeded.info_hashes, vec!["S".to_string()]);
        assert!(!harness.additions.is_in_flight("S"));
        assert!(harness.room.room(&harness.session.room_id).unwrap().photo("S").is_some());
    }

    #[tokio::test]
    async fn secure_bundle_binds_every_original() {
        let harness = Harness::with_thumbnails(Arc::new(FixedThumbnail));
        let bundle = SourceFile::new("bundle.enc", "application/octet-stream", Bytes::from_static(b"sealed"));
        let originals = vec![jpeg("a.jpg", b"aaa"), jpeg("b.jpg", b"bbb")];

        let seeded = harness.additions.seed(vec![bundle], true, originals).await.unwrap();
        let base = seeded.handle.info_hash().unwrap();
        assert_eq!(seeded.handle.files().unwrap().len(), 1);

        let mut ids = seeded.info_hashes.clone();
        ids.sort();
        assert_eq!(ids, vec![format!("{base}-a.jpg"), format!("{base}-b.jpg")]);
        for id in &ids {
            let record = harness.session.photos.get(id).unwrap();
            assert_eq!(record.state, PhotoState::MetadataBound);
            assert_eq!(record.bound_file.as_deref(), Some("bundle.enc"));
            assert!(record.secure);
            assert_eq!(record.base_hash(), base);
        }
        assert_eq!(harness.session.photos.snapshot().len(), 2);
        let room = harness.room.room(&harness.session.room_id).unwrap();
        assert_eq!(room.photos.len(), 2);
    }

    #[tokio::test]
    async fn thumbnails_are_bundled_but_never_listed() {
        let harness = Harness::with_thumbnails(Arc::new(FixedThumbnail));
        let seeded = harness
            .additions
            .seed(vec![jpeg("a.jpg", b"abc")], false, Vec::new())
            .await
            .unwrap();

        let base = seeded.handle.info_hash().unwrap();
        assert_eq!(seeded.info_hashes, vec![base]);
        let files = seeded.handle.files().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.jpg/a.jpg", "a.jpg/thumbnail-a.jpg"]);

        let snapshot = harness.session.photos.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].bound_file.as_deref(), Some("a.jpg/a.jpg"));
        let room = harness.room.room(&harness.session.room_id).unwrap();
        assert_eq!(room.photos.len(), 1);
    }

    #[tokio::test]
    async fn download_order_follows_the_preference() {
        let harness = Harness::new();
        harness.swarm_publish("h1", &[("a.jpg", "abc")]);
        harness.swarm_publish("h2", &[("b.jpg", "def")]);
        harness.swarm_publish("h3", &[("clip.mp4", "mov")]);
        let mut bus = harness.session.bus.subscribe();

        assert!(!harness.coordinator.sequential_download());
        harness.coordinator.set_sequential_download(true).unwrap();
        assert!(harness.session.store.preferences().unwrap().sequential_download);

        let first = harness.additions.add("h1", None).await.unwrap();
        wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Completed { info_hash } if info_hash == "h1")).await;
        assert_eq!(first.handle().unwrap().strategy(), Some(DownloadStrategy::Sequential));

        harness.coordinator.set_sequential_download(false).unwrap();
        let second = harness.additions.add("h2", None).await.unwrap();
        wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Completed { info_hash } if info_hash == "h2")).await;
        assert_eq!(second.handle().unwrap().strategy(), Some(DownloadStrategy::RarestFirst));
        assert!(!harness.session.store.preferences().unwrap().sequential_download);

        let streamed = harness.additions.add("h3", None).await.unwrap();
        wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Completed { info_hash } if info_hash == "h3")).await;
        assert_eq!(streamed.handle().unwrap().strategy(), None);
    }

    #[tokio::test]
    async fn duplicate_add_is_reported() {
        let memory = Arc::new(MemoryEngine::new());
        memory.preload("E", vec![file("e.jpg", "e.jpg")]);
        let engine = DuplicateEngine {
            inner: memory.clone(),
            existing: "E",
        };
        let harness = Harness::with_engine(memory, Arc::new(engine));
        let mut bus = harness.session.bus.subscribe();

        let outcome = harness.additions.add("X", None).await.unwrap();
        assert!(matches!(&outcome, AddOutcome::AlreadyPresent(h) if h.info_hash().as_deref() == Some("E")));
        let event = wait_for_event(&mut bus, |e| matches!(e, ContentEvent::Duplicate { .. })).await;
        assert_eq!(
            event,
            ContentEvent::Duplicate {
                placeholder: "X".to_string(),
                existing: "E".to_string(),
            }
        );
    }

    struct FixedThumbnail;

    #[async_trait::async_trait]
    impl ThumbnailExtractor for FixedThumbnail {
        async fn extract(&self, _file: &SourceFile) -> Result<Option<Bytes>, ContentError> {
            Ok(Some(Bytes::from_static(b"thumb")))
        }
    }

    /// Engine whose seeds mint the identifier `S` at once but only get
    /// metadata when the test fills in `pending`.
    struct SlowSeedEngine {
        inner: Arc<MemoryEngine>,
        pending: TransferHandle,
    }

    #[async_trait::async_trait]
    impl ContentEngine for SlowSeedEngine {
        async fn add(&self, info_hash: &str, opts: AddOptions) -> Result<TransferHandle, EngineError> {
            self.inner.add(info_hash, opts).await
        }

        async fn seed(&self, _files: Vec<SourceFile>, _opts: SeedOptions) -> Result<TransferHandle, EngineError> {
            self.pending.set_info_hash("S");
            Ok(self.pending.clone())
        }

        async fn remove(&self, info_hash: &str) -> Result<(), EngineError> {
            if info_hash == "S" {
                self.pending.close();
                return Ok(());
            }
            self.inner.remove(info_hash).await
        }

        fn get(&self, info_hash: &str) -> Option<TransferHandle> {
            if info_hash == "S" {
                return Some(self.pending.clone());
            }
            self.inner.get(info_hash)
        }

        fn transfers(&self) -> Vec<TransferHandle> {
            let mut transfers = self.inner.transfers();
            if self.pending.info_hash().is_some() {
                transfers.push(self.pending.clone());
            }
            transfers
        }
    }

    /// Engine that answers every `add` with a duplicate of `existing`.
    struct DuplicateEngine {
        inner: Arc<MemoryEngine>,
        existing: &'static str,
    }

    #[async_trait::async_trait]
    impl ContentEngine for DuplicateEngine {
        async fn add(&self, _info_hash: &str, _opts: AddOptions) -> Result<TransferHandle, EngineError> {
            Err(EngineError::Duplicate(self.existing.to_string()))
        }

        async fn seed(&self, files: Vec<SourceFile>, opts: SeedOptions) -> Result<TransferHandle, EngineError> {
            self.inner.seed(files, opts).await
        }

        async fn remove(&self, info_hash: &str) -> Result<(), EngineError> {
            self.inner.remove(info_hash).await
        }

        fn get(&self, info_hash: &str) -> Option<TransferHandle> {
            self.inner.get(info_hash)
        }

        fn transfers(&self) -> Vec<TransferHandle> {
            self.inner.transfers()
        }
    }

    /// Engine whose `add` blocks until released.
    struct GatedEngine {
        inner: Arc<MemoryEngine>,
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl ContentEngine for GatedEngine {
        async fn add(&self, info_hash: &str, opts: AddOptions) -> Result<TransferHandle, EngineError> {
            self.gate.notified().await;
            self.inner.add(info_hash, opts).await
        }

        async fn seed(&self, files: Vec<SourceFile>, opts: SeedOptions) -> Result<TransferHandle, EngineError> {
            self.inner.seed(files, opts).await
        }

        async fn remove(&self, info_hash: &str) -> Result<(), EngineError> {
            self.inner.remove(info_hash).await
        }

        fn get(&self, info_hash: &str) -> Option<TransferHandle> {
            self.inner.get(info_hash)
        }

        fn transfers(&self) -> Vec<TransferHandle> {
            self.inner.transfers()
        }
    }
}
