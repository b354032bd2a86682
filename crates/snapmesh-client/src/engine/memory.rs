//! In-process content engine.
//!
//! Transfers are content-addressed with BLAKE3 and "downloaded" from a
//! [`MemorySwarm`] shared between engines in the same process. Used by the
//! diagnostic peer and the tests; failure knobs let tests make individual
//! identifiers fail or hang.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use super::{
    AddOptions, ContentEngine, EngineError, EngineFile, SeedOptions, SourceFile, TransferEvent,
    TransferHandle,
};

/// Content seeded by any engine in the process, by identifier.
#[derive(Clone, Default)]
pub struct MemorySwarm {
    content: Arc<Mutex<HashMap<String, Vec<(EngineFile, Bytes)>>>>,
}

impl MemorySwarm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(EngineFile, Bytes)>>> {
        match self.content.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish a transfer directly, as if a remote peer seeded it.
    pub fn publish(&self, info_hash: &str, files: Vec<(EngineFile, Bytes)>) {
        self.lock().insert(info_hash.to_string(), files);
    }

    fn files(&self, info_hash: &str) -> Option<Vec<EngineFile>> {
        self.lock()
            .get(info_hash)
            .map(|files| files.iter().map(|(f, _)| f.clone()).collect())
    }
}

#[derive(Default)]
struct Knobs {
    fail_add: HashSet<String>,
    hang: HashSet<String>,
    add_calls: Vec<String>,
}

pub struct MemoryEngine {
    swarm: MemorySwarm,
    transfers: Mutex<HashMap<String, TransferHandle>>,
    knobs: Mutex<Knobs>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_swarm(MemorySwarm::new())
    }

    pub fn with_swarm(swarm: MemorySwarm) -> Self {
        Self {
            swarm,
            transfers: Mutex::new(HashMap::new()),
            knobs: Mutex::new(Knobs::default()),
        }
    }

    pub fn swarm(&self) -> &MemorySwarm {
        &self.swarm
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, TransferHandle>> {
        match self.transfers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn knobs(&self) -> MutexGuard<'_, Knobs> {
        match self.knobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make `add` of `info_hash` fail.
    pub fn fail_add(&self, info_hash: &str) {
        self.knobs().fail_add.insert(info_hash.to_string());
    }

    /// Make `add` of `info_hash` succeed but never deliver metadata.
    pub fn hang(&self, info_hash: &str) {
        self.knobs().hang.insert(info_hash.to_string());
    }

    /// Identifiers passed to `add`, in call order.
    pub fn add_calls(&self) -> Vec<String> {
        self.knobs().add_calls.clone()
    }

    /// Hold `info_hash` as fully downloaded content without going through
    /// `add`, as if it survived from an earlier session.
    pub fn preload(&self, info_hash: &str, files: Vec<EngineFile>) -> TransferHandle {
        let handle = TransferHandle::new();
        handle.set_info_hash(info_hash);
        handle.set_metadata(files, serde_json::json!({ "infoHash": info_hash }));
        handle.mark_done();
        self.table().insert(info_hash.to_string(), handle.clone());
        handle
    }

    fn content_hash(files: &[SourceFile]) -> String {
        let mut hasher = blake3::Hasher::new();
        for file in files {
            hasher.update(file.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&file.data);
        }
        hex::encode(&hasher.finalize().as_bytes()[..20])
    }
}

#[async_trait]
impl ContentEngine for MemoryEngine {
    async fn add(&self, info_hash: &str, opts: AddOptions) -> Result<TransferHandle, EngineError> {
        let (fail, hang) = {
            let mut knobs = self.knobs();
            knobs.add_calls.push(info_hash.to_string());
            (knobs.fail_add.contains(info_hash), knobs.hang.contains(info_hash))
        };
        if fail {
            return Err(EngineError::Failed(format!("cannot add {info_hash}")));
        }

        let handle = {
            let mut transfers = self.table();
            if transfers.contains_key(info_hash) {
                return Err(EngineError::Duplicate(info_hash.to_string()));
            }
            let handle = TransferHandle::new();
            handle.set_info_hash(info_hash);
            transfers.insert(info_hash.to_string(), handle.clone());
            handle
        };
        debug!(info_hash = %info_hash, secure = opts.secure, resumed = opts.descriptor.is_some(), "transfer added");

        if hang {
            return Ok(handle);
        }

        let files = self.swarm.files(info_hash);
        let task_handle = handle.clone();
        let info_hash = info_hash.to_string();
        tokio::spawn(async move {
            let Some(files) = files else {
                debug!(info_hash = %info_hash, "no peers hold this transfer");
                return;
            };
            task_handle.set_metadata(files, serde_json::json!({ "infoHash": info_hash }));
            task_handle.emit(TransferEvent::Download {
                progress: 0.5,
                speed: 1024,
            });
            task_handle.emit(TransferEvent::Download {
                progress: 1.0,
                speed: 1024,
            });
            task_handle.mark_done();
        });

        Ok(handle)
    }

    async fn seed(&self, files: Vec<SourceFile>, opts: SeedOptions) -> Result<TransferHandle, EngineError> {
        let info_hash = Self::content_hash(&files);
        if self.table().contains_key(&info_hash) {
            return Err(EngineError::Duplicate(info_hash));
        }

        let bundle = files.len() > 1 && !opts.name.is_empty();
        let entries: Vec<(EngineFile, Bytes)> = files
            .into_iter()
            .map(|file| {
                let path = if bundle {
                    format!("{}/{}", opts.name, file.name)
                } else {
                    file.name.clone()
                };
                let entry = EngineFile {
                    path,
                    length: file.len(),
                    name: file.name,
                    mime: file.mime,
                };
                (entry, file.data)
            })
            .collect();
        let engine_files: Vec<EngineFile> = entries.iter().map(|(f, _)| f.clone()).collect();
        self.swarm.publish(&info_hash, entries);

        let handle = TransferHandle::new();
        handle.set_info_hash(info_hash.clone());
        handle.set_metadata(
            engine_files,
            serde_json::json!({ "infoHash": info_hash, "name": opts.name }),
        );
        handle.mark_done();
        self.table().insert(info_hash.clone(), handle.clone());

        info!(info_hash = %info_hash, secure = opts.secure, "seeding");
        Ok(handle)
    }

    async fn remove(&self, info_hash: &str) -> Result<(), EngineError> {
        let handle = self
            .table()
            .remove(info_hash)
            .ok_or_else(|| EngineError::NotFound(info_hash.to_string()))?;
        handle.close();
        debug!(info_hash = %info_hash, "transfer removed");
        Ok(())
    }

    /// Like many engines, answers unknown identifiers with an empty handle.
    fn get(&self, info_hash: &str) -> Option<TransferHandle> {
        Some(
            self.table()
                .get(info_hash)
                .cloned()
                .unwrap_or_default(),
        )
    }

    fn transfers(&self) -> Vec<TransferHandle> {
        self.table().values().cloned().collect()
    }
}
