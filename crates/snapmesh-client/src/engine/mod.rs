//! Content engine seam.
//!
//! The peer-to-peer transfer engine is a black box that can add a transfer
//! by identifier, seed local files and remove transfers. Each transfer is
//! observed through a [`TransferHandle`] whose lifecycle milestones are
//! latched, so a caller that subscribes after metadata arrived still sees it.

pub mod memory;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use snapmesh_net::{WireInfo, WireSource};
use snapmesh_shared::constants::STREAMABLE_EXTENSIONS;
use snapmesh_shared::content_id;

pub use memory::MemoryEngine;

const EVENT_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine already holds this content under the given identifier.
    #[error("Duplicate content: {0}")]
    Duplicate(String),

    #[error("No valid input: {0}")]
    InvalidInput(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    /// Tracker or socket noise that does not affect the transfer.
    #[error("Transient engine error: {0}")]
    Transient(String),

    #[error("Transfer failed: {0}")]
    Failed(String),

    #[error("Transfer closed before {0}")]
    Closed(&'static str),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// One file inside a transfer, as enumerated by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFile {
    /// Path inside the transfer; unique per transfer.
    pub path: String,
    pub name: String,
    pub length: u64,
    pub mime: String,
}

impl EngineFile {
    pub fn is_thumbnail(&self) -> bool {
        content_id::is_thumbnail(&self.path)
    }

    pub fn is_streamable(&self) -> bool {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| {
                let ext = ext.to_ascii_lowercase();
                STREAMABLE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }
}

/// A local file handed to the engine for seeding.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStrategy {
    Sequential,
    RarestFirst,
}

impl DownloadStrategy {
    pub fn from_preference(sequential: bool) -> Self {
        if sequential {
            DownloadStrategy::Sequential
        } else {
            DownloadStrategy::RarestFirst
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub secure: bool,
    /// Engine payload persisted from an earlier session, if any.
    pub descriptor: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    pub name: String,
    pub secure: bool,
}

/// Non-latched per-transfer events.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Wire(WireInfo),
    Download { progress: f64, speed: u64 },
    Upload { speed: u64 },
    Done,
    Error(EngineError),
}

/// Latched transfer milestones.
#[derive(Debug, Clone, Default)]
pub struct TransferState {
    pub info_hash: Option<String>,
    pub files: Option<Arc<Vec<EngineFile>>>,
    pub done: bool,
    pub error: Option<EngineError>,
    pub closed: bool,
}

struct HandleInner {
    state: watch::Sender<TransferState>,
    events: broadcast::Sender<TransferEvent>,
    wires: Mutex<Vec<WireInfo>>,
    strategy: Mutex<Option<DownloadStrategy>>,
    payload: Mutex<Option<serde_json::Value>>,
}

/// Shared view of one engine transfer.
#[derive(Clone)]
pub struct TransferHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("TransferHandle")
            .field("info_hash", &state.info_hash)
            .field("files", &state.files.as_ref().map(|f| f.len()))
            .field("done", &state.done)
            .finish()
    }
}

impl Default for TransferHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferHandle {
    /// An unpopulated handle; the engine fills it in as the transfer starts.
    pub fn new() -> Self {
        let (state, _) = watch::channel(TransferState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(HandleInner {
                state,
                events,
                wires: Mutex::new(Vec::new()),
                strategy: Mutex::new(None),
                payload: Mutex::new(None),
            }),
        }
    }

    pub fn ptr_eq(&self, other: &TransferHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -- engine side -------------------------------------------------------

    pub fn set_info_hash(&self, info_hash: impl Into<String>) {
        let info_hash = info_hash.into();
        self.inner.state.send_modify(|s| s.info_hash = Some(info_hash));
    }

    pub fn set_metadata(&self, files: Vec<EngineFile>, payload: serde_json::Value) {
        if let Ok(mut slot) = self.inner.payload.lock() {
            *slot = Some(payload);
        }
        self.inner
            .state
            .send_modify(|s| s.files = Some(Arc::new(files)));
    }

    pub fn mark_done(&self) {
        self.inner.state.send_modify(|s| s.done = true);
        self.emit(TransferEvent::Done);
    }

    /// Report an error. Non-transient errors are latched and end every wait.
    pub fn report_error(&self, error: EngineError) {
        if !error.is_transient() {
            let latched = error.clone();
            self.inner.state.send_modify(|s| s.error = Some(latched));
        }
        self.emit(TransferEvent::Error(error));
    }

    pub fn add_wire(&self, wire: WireInfo) {
        if let Ok(mut wires) = self.inner.wires.lock() {
            wires.push(wire.clone());
        }
        self.emit(TransferEvent::Wire(wire));
    }

    pub fn emit(&self, event: TransferEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    /// Mark the transfer removed from the engine.
    pub fn close(&self) {
        self.inner.state.send_modify(|s| s.closed = true);
    }

    // -- consumer side -----------------------------------------------------

    pub fn state(&self) -> TransferState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TransferState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.events.subscribe()
    }

    pub fn info_hash(&self) -> Option<String> {
        self.inner.state.borrow().info_hash.clone()
    }

    pub fn files(&self) -> Option<Arc<Vec<EngineFile>>> {
        self.inner.state.borrow().files.clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.borrow().done
    }

    pub fn payload(&self) -> Option<serde_json::Value> {
        self.inner.payload.lock().ok().and_then(|p| p.clone())
    }

    pub fn set_strategy(&self, strategy: DownloadStrategy) {
        if let Ok(mut slot) = self.inner.strategy.lock() {
            *slot = Some(strategy);
        }
    }

    pub fn strategy(&self) -> Option<DownloadStrategy> {
        self.inner.strategy.lock().ok().and_then(|s| *s)
    }

    /// Resolves with the identifier once minted, immediately if it already is.
    pub async fn wait_info_hash(&self) -> Result<String, EngineError> {
        let state = self
            .wait_until(|s| s.info_hash.is_some(), "identifier")
            .await?;
        state.info_hash.ok_or(EngineError::Closed("identifier"))
    }

    /// Resolves with the file list once metadata is known, immediately if it
    /// already is.
    pub async fn wait_metadata(&self) -> Result<Arc<Vec<EngineFile>>, EngineError> {
        let state = self.wait_until(|s| s.files.is_some(), "metadata").await?;
        state.files.ok_or(EngineError::Closed("metadata"))
    }

    pub async fn wait_done(&self) -> Result<(), EngineError> {
        self.wait_until(|s| s.done, "completion").await.map(|_| ())
    }

    async fn wait_until<F>(&self, ready: F, what: &'static str) -> Result<TransferState, EngineError>
    where
        F: Fn(&TransferState) -> bool,
    {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|s| ready(s) || s.error.is_some() || s.closed)
            .await
            .map_err(|_| EngineError::Closed(what))?
            .clone();

        if ready(&state) {
            return Ok(state);
        }
        match state.error {
            Some(error) => Err(error),
            None => Err(EngineError::Closed(what)),
        }
    }
}

impl WireSource for TransferHandle {
    fn info_hash(&self) -> Option<String> {
        TransferHandle::info_hash(self)
    }

    fn wires(&self) -> Vec<WireInfo> {
        self.inner
            .wires
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

/// Raw engine primitives.
///
/// `get` may return a handle whose identifier is not populated yet; use
/// [`EngineAdapter`] to get a proper optional.
#[async_trait]
pub trait ContentEngine: Send + Sync {
    async fn add(&self, info_hash: &str, opts: AddOptions) -> Result<TransferHandle, EngineError>;
    async fn seed(&self, files: Vec<SourceFile>, opts: SeedOptions) -> Result<TransferHandle, EngineError>;
    async fn remove(&self, info_hash: &str) -> Result<(), EngineError>;
    fn get(&self, info_hash: &str) -> Option<TransferHandle>;
    fn transfers(&self) -> Vec<TransferHandle>;
}

/// Engine wrapper that only ever exposes populated transfers.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn ContentEngine>,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn ContentEngine>) -> Self {
        Self { engine }
    }

    /// The transfer holding `id`, bare or compound.
    pub fn get(&self, id: &str) -> Option<TransferHandle> {
        let base = content_id::base_hash(id);
        self.engine
            .get(base)
            .filter(|h| h.info_hash().as_deref() == Some(base))
    }

    pub fn holds(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Base identifiers of every populated transfer.
    pub fn held_ids(&self) -> Vec<String> {
        self.engine
            .transfers()
            .iter()
            .filter_map(TransferHandle::info_hash)
            .collect()
    }

    pub async fn add(&self, info_hash: &str, opts: AddOptions) -> Result<TransferHandle, EngineError> {
        self.engine.add(content_id::base_hash(info_hash), opts).await
    }

    pub async fn seed(&self, files: Vec<SourceFile>, opts: SeedOptions) -> Result<TransferHandle, EngineError> {
        if files.is_empty() || files.iter().all(SourceFile::is_empty) {
            return Err(EngineError::InvalidInput("no file contents".to_string()));
        }
        self.engine.seed(files, opts).await
    }

    pub async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.engine.remove(content_id::base_hash(id)).await
    }
}
