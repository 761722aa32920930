//! The "STORE" - durable persistence port and asynchronous writer queue
//!
//! The registry cache is authoritative at runtime; the store is read once at
//! startup and for audit history. Every write goes through a single worker
//! thread fed by a FIFO channel, so callers on the world thread never block
//! and later writes for the same relic always land after earlier ones.

use crate::relic_audit::AuditEvent;
use crate::relic_registry::RelicRecord;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

// ============================================================================
// STORE PORT
// ============================================================================

/// Durable persistence port consumed by the registry and audit log.
///
/// Implementations must be thread-safe; all writes arrive from the writer
/// worker thread.
pub trait RelicStore: Send + Sync {
    /// Every persisted record. Called once at startup.
    fn load_all(&self) -> Result<Vec<RelicRecord>, StoreError>;

    fn upsert(&self, record: &RelicRecord) -> Result<(), StoreError>;

    /// Next id counter, if one was ever written.
    fn read_counter(&self) -> Result<Option<u64>, StoreError>;

    fn write_counter(&self, next: u64) -> Result<(), StoreError>;

    fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Keeps the newest `keep` events for a relic. Returns how many were removed.
    fn prune_audit(&self, relic_id: &str, keep: usize) -> Result<usize, StoreError>;

    /// Newest first.
    fn audit_history(&self, relic_id: &str, limit: usize) -> Result<Vec<AuditEvent>, StoreError>;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Sled-based persistent relic store
///
/// Trees: `relics` (id -> JSON record), `meta` (counter), `audit`
/// (`<id>\0<seq>` -> JSON event, seq ascending).
pub struct SledRelicStore {
    db: sled::Db,
    relics: sled::Tree,
    meta: sled::Tree,
    audit: sled::Tree,
}

const COUNTER_KEY: &[u8] = b"next_counter";

impl SledRelicStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::storage(format!("Failed to open sled DB: {}", e)))?;
        Self::from_db(db)
    }

    /// Create a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| StoreError::storage(format!("Failed to open temp DB: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            relics: db.open_tree("relics")?,
            meta: db.open_tree("meta")?,
            audit: db.open_tree("audit")?,
            db,
        })
    }

    fn audit_prefix(relic_id: &str) -> Vec<u8> {
        let mut prefix = relic_id.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }
}

impl RelicStore for SledRelicStore {
    fn load_all(&self) -> Result<Vec<RelicRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.relics.iter() {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn upsert(&self, record: &RelicRecord) -> Result<(), StoreError> {
        self.relics
            .insert(record.id.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn read_counter(&self) -> Result<Option<u64>, StoreError> {
        let Some(raw) = self.meta.get(COUNTER_KEY)? else {
            return Ok(None);
        };
        let bytes = <[u8; 8]>::try_from(&raw[..])
            .map_err(|_| StoreError::Codec(format!("counter has {} bytes", raw.len())))?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    fn write_counter(&self, next: u64) -> Result<(), StoreError> {
        self.meta.insert(COUNTER_KEY, next.to_be_bytes().to_vec())?;
        Ok(())
    }

    fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let seq = self.db.generate_id()?;
        let mut key = Self::audit_prefix(&event.relic_id);
        key.extend_from_slice(&seq.to_be_bytes());
        self.audit.insert(key, serde_json::to_vec(event)?)?;
        Ok(())
    }

    fn prune_audit(&self, relic_id: &str, keep: usize) -> Result<usize, StoreError> {
        let keys = self
            .audit
            .scan_prefix(Self::audit_prefix(relic_id))
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        if keys.len() <= keep {
            return Ok(0);
        }
        let excess = keys.len() - keep;
        for key in keys.into_iter().take(excess) {
            self.audit.remove(key)?;
        }
        Ok(excess)
    }

    fn audit_history(&self, relic_id: &str, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        let mut events = Vec::new();
        for entry in self.audit.scan_prefix(Self::audit_prefix(relic_id)).rev() {
            if events.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            events.push(serde_json::from_slice(&value)?);
        }
        Ok(events)
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory store for tests and the simulation harness.
#[derive(Default)]
pub struct MemoryRelicStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    relics: BTreeMap<String, RelicRecord>,
    counter: Option<u64>,
    audit: Vec<AuditEvent>,
    fail_writes: bool,
}

impl MemoryRelicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seeds the store as if a previous process had written it.
    pub fn seeded(records: Vec<RelicRecord>, counter: Option<u64>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for record in records {
                inner.relics.insert(record.id.clone(), record);
            }
            inner.counter = counter;
        }
        store
    }

    /// Makes every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn record(&self, id: &str) -> Option<RelicRecord> {
        self.inner.lock().relics.get(id).cloned()
    }

    pub fn counter(&self) -> Option<u64> {
        self.inner.lock().counter
    }

    /// Every stored audit event, oldest first.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.inner.lock().audit.clone()
    }

    fn check_writable(inner: &MemoryInner) -> Result<(), StoreError> {
        if inner.fail_writes {
            return Err(StoreError::storage("memory store rejecting writes"));
        }
        Ok(())
    }
}

impl RelicStore for MemoryRelicStore {
    fn load_all(&self) -> Result<Vec<RelicRecord>, StoreError> {
        Ok(self.inner.lock().relics.values().cloned().collect())
    }

    fn upsert(&self, record: &RelicRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner.relics.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn read_counter(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.lock().counter)
    }

    fn write_counter(&self, next: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner.counter = Some(next);
        Ok(())
    }

    fn append_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner.audit.push(event.clone());
        Ok(())
    }

    fn prune_audit(&self, relic_id: &str, keep: usize) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        let total = inner.audit.iter().filter(|e| e.relic_id == relic_id).count();
        if total <= keep {
            return Ok(0);
        }
        let mut excess = total - keep;
        let removed = excess;
        inner.audit.retain(|e| {
            if excess > 0 && e.relic_id == relic_id {
                excess -= 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    fn audit_history(&self, relic_id: &str, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .audit
            .iter()
            .rev()
            .filter(|e| e.relic_id == relic_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// WRITER QUEUE
// ============================================================================

/// One durable write.
#[derive(Debug)]
pub enum WriteOp {
    Upsert(RelicRecord),
    Counter(u64),
    Audit(AuditEvent),
    Prune { relic_id: String, keep: usize },
    /// Appends a line to the flat audit file.
    AuditLine { path: PathBuf, line: String },
    /// Signals the sender once everything queued before it has been applied.
    Barrier(std::sync::mpsc::SyncSender<()>),
    /// Stops the worker after everything queued before it.
    Shutdown,
}

impl WriteOp {
    fn label(&self) -> String {
        match self {
            WriteOp::Upsert(record) => format!("upsert {}", record.id),
            WriteOp::Counter(next) => format!("counter {}", next),
            WriteOp::Audit(event) => format!("audit {} {}", event.relic_id, event.kind),
            WriteOp::Prune { relic_id, .. } => format!("prune {}", relic_id),
            WriteOp::AuditLine { path, .. } => format!("audit line {}", path.display()),
            WriteOp::Barrier(_) => "barrier".to_string(),
            WriteOp::Shutdown => "shutdown".to_string(),
        }
    }
}

/// Cloneable submission side of the writer queue.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteHandle {
    /// Queues a write. Never blocks; a closed queue drops the write with an error log.
    pub fn submit(&self, op: WriteOp) {
        if let Err(mpsc::error::SendError(op)) = self.tx.send(op) {
            error!("Writer queue closed, dropping {}", op.label());
        }
    }

    /// A handle whose queue is already closed. Every write is dropped.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// The single durable-write worker.
pub struct WriteQueue {
    handle: WriteHandle,
    worker: Option<JoinHandle<()>>,
    done: std::sync::mpsc::Receiver<()>,
}

impl WriteQueue {
    /// Starts the worker thread over `store`.
    pub fn spawn(store: Arc<dyn RelicStore>) -> Result<Self, StoreError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);

        let worker = std::thread::Builder::new()
            .name("relic-writer".to_string())
            .spawn(move || {
                while let Some(op) = rx.blocking_recv() {
                    if matches!(op, WriteOp::Shutdown) {
                        break;
                    }
                    apply(store.as_ref(), op);
                }
                if let Err(e) = store.flush() {
                    error!("Final store flush failed: {}", e);
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| StoreError::storage(format!("Failed to spawn writer: {}", e)))?;

        Ok(Self {
            handle: WriteHandle { tx },
            worker: Some(worker),
            done: done_rx,
        })
    }

    pub fn handle(&self) -> WriteHandle {
        self.handle.clone()
    }

    /// Waits until every write queued so far has been applied.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.handle.submit(WriteOp::Barrier(tx));
        rx.recv_timeout(timeout).is_ok()
    }

    /// Drains the queue and stops the worker, waiting at most `timeout`.
    ///
    /// Returns false when the drain timed out; anything still queued is lost.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        self.handle.submit(WriteOp::Shutdown);
        match self.done.recv_timeout(timeout) {
            Ok(()) => {
                if worker.join().is_err() {
                    error!("Writer thread panicked during shutdown");
                }
                debug!("Writer queue drained");
                true
            }
            Err(_) => {
                error!(
                    "Writer queue did not drain within {:?}; pending writes may be lost",
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown(Duration::from_secs(10));
        }
    }
}

fn apply(store: &dyn RelicStore, op: WriteOp) {
    let label = op.label();
    let result = match op {
        WriteOp::Upsert(record) => store.upsert(&record),
        WriteOp::Counter(next) => store.write_counter(next),
        WriteOp::Audit(event) => store.append_audit(&event),
        WriteOp::Prune { relic_id, keep } => store.prune_audit(&relic_id, keep).map(|_| ()),
        WriteOp::AuditLine { path, line } => {
            if let Err(e) = append_line(&path, &line) {
                // The store is the authoritative audit trail
                warn!("Failed to append audit line to {}: {}", path.display(), e);
            }
            Ok(())
        }
        WriteOp::Barrier(ack) => {
            let _ = ack.send(());
            Ok(())
        }
        WriteOp::Shutdown => Ok(()),
    };
    if let Err(e) = result {
        error!("Durable write failed ({}), dropping it: {}", label, e);
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)
}
