use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::{OnceCell, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::StoreConfig,
    document::StateDocument,
    error::{Result, SaveOutcome, StoreError},
    ledger::{
        FileMeta, Job, JobStatus, OperationPatch, OrganizeBatch,
        PlannedOperation, ReadyEntry,
    },
    persist::{
        AtomicWriter, SaveCoalescer, SaveErrorRecord, SaveHealth,
        SaveHealthSnapshot, WriteSerializer, coalescer,
    },
    sweep::{SweepReport, sweep},
    timestamp::{self, Timestamp},
};

/// Durable job-state store.
///
/// Cheap to clone; all clones share one in-memory document and one write
/// pipeline. Must be used from within a tokio runtime. Every operation
/// initializes the store lazily, mutates the document synchronously, and then
/// waits for the debounced write that covers the mutation.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    writer: AtomicWriter,
    serializer: WriteSerializer,
    coalescer: SaveCoalescer,
    health: SaveHealth,
    document: Mutex<StateDocument>,
    init: OnceCell<()>,
    shutdown_token: CancellationToken,
    shut_down: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (jobs, ready, batches) = self
            .inner
            .document
            .try_lock()
            .map(|doc| {
                (
                    doc.analysis.jobs.len(),
                    doc.analysis.ready.len(),
                    doc.organize.batches.len(),
                )
            })
            .unwrap_or_default();

        f.debug_struct("StateStore")
            .field("path", &self.inner.writer.path())
            .field("initialized", &self.inner.init.initialized())
            .field("jobs", &jobs)
            .field("ready", &ready)
            .field("batches", &batches)
            .field("pending_saves", &self.inner.coalescer.pending_len())
            .field("healthy", &self.inner.health.is_healthy())
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, config: StoreConfig) -> Self {
        let path = path.into();
        let now = timestamp::now();
        Self {
            inner: Arc::new(StoreInner {
                writer: AtomicWriter::new(path, &config.save),
                serializer: WriteSerializer::new(),
                coalescer: SaveCoalescer::new(config.save.debounce()),
                health: SaveHealth::new(config.save.failure_threshold),
                document: Mutex::new(StateDocument::empty(now)),
                init: OnceCell::new(),
                shutdown_token: CancellationToken::new(),
                shut_down: AtomicBool::new(false),
                sweeper: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        self.inner.writer.path()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Load or create the document, run the first sweep, and start the
    /// sweep scheduler. Concurrent and repeated calls share one run.
    pub async fn initialize(&self) -> Result<()> {
        self.inner
            .init
            .get_or_try_init(|| self.load_and_start())
            .await
            .map(|_| ())
    }

    /// Like [`StateStore::initialize`], but gives up when `cancel` fires.
    /// Only the initialization is aborted; a later call starts over.
    pub async fn initialize_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled(
                "state store initialization aborted".into(),
            )),
            res = self.initialize() => res,
        }
    }

    // ---- analysis jobs ----

    pub async fn mark_analysis_start(&self, path: &str) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            doc.analysis.jobs.mark_start(path, now);
            doc.touch_analysis(now);
        });
        settle(save).await
    }

    /// Mark a job done. When `result` is given it is also queued as a ready
    /// entry; a payload that fails sanitization is dropped without failing
    /// the completion.
    pub async fn mark_analysis_complete(
        &self,
        path: &str,
        result: Option<&Value>,
    ) -> Result<()> {
        self.initialize().await?;
        let meta = match result {
            Some(_) => file_meta(path).await,
            None => FileMeta::default(),
        };
        let cap = self.inner.config.retention.ready_max_entries;

        let ((), save) = self.commit(|doc, now| {
            doc.analysis.jobs.mark_complete(path, now);
            if let Some(raw) = result
                && !doc.analysis.ready.upsert(path, raw, meta, now, cap)
            {
                debug!(target: "state::ready", path, "analysis result had no usable fields; not queued");
            }
            doc.touch_analysis(now);
        });
        settle(save).await
    }

    pub async fn mark_analysis_error(
        &self,
        path: &str,
        message: &str,
    ) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            doc.analysis.jobs.mark_failed(path, message, now);
            doc.touch_analysis(now);
        });
        settle(save).await
    }

    pub async fn get_state(&self, path: &str) -> Result<Option<JobStatus>> {
        self.initialize().await?;
        Ok(self.read(|doc| doc.analysis.jobs.status(path)))
    }

    pub async fn get_job(&self, path: &str) -> Result<Option<Job>> {
        self.initialize().await?;
        Ok(self.read(|doc| doc.analysis.jobs.get(path).cloned()))
    }

    pub async fn clear_state(&self, path: &str) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            if doc.analysis.jobs.clear(path).is_some() {
                doc.touch_analysis(now);
            }
        });
        settle(save).await
    }

    /// Follow a file that was moved on disk: its job and ready entry are
    /// re-keyed together before a single save.
    pub async fn move_job(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.initialize().await?;
        let (moved, save) =
            self.commit(|doc, now| doc.move_path(old_path, new_path, now));
        if moved {
            debug!(target: "state::load", from = old_path, to = new_path, "tracked path moved");
        }
        settle(save).await
    }

    pub async fn get_incomplete_analyses(&self) -> Result<Vec<(String, Job)>> {
        self.initialize().await?;
        Ok(self.read(|doc| doc.analysis.jobs.list_incomplete()))
    }

    // ---- ready queue ----

    /// Queue an analysis result. Returns `Ok(false)` when the payload has no
    /// usable content; nothing is stored and no save is requested.
    pub async fn upsert_ready_analysis(
        &self,
        path: &str,
        result: &Value,
    ) -> Result<bool> {
        self.initialize().await?;
        let meta = file_meta(path).await;
        let cap = self.inner.config.retention.ready_max_entries;

        let now = timestamp::now();
        let accepted = {
            let mut doc = self.inner.document.lock();
            let accepted = doc.analysis.ready.upsert(path, result, meta, now, cap);
            if accepted {
                doc.touch_analysis(now);
            }
            accepted
        };
        if !accepted {
            debug!(target: "state::ready", path, "rejected analysis result with no usable fields");
            return Ok(false);
        }

        settle(self.inner.schedule_save()).await?;
        Ok(true)
    }

    pub async fn clear_ready_analysis(&self, path: &str) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            if doc.analysis.ready.clear(path).is_some() {
                doc.touch_analysis(now);
            }
        });
        settle(save).await
    }

    /// Ready entries, most recent first.
    pub async fn get_ready_analyses(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<ReadyEntry>> {
        self.initialize().await?;
        Ok(self.read(|doc| doc.analysis.ready.list(limit)))
    }

    // ---- organize batches ----

    pub async fn create_or_load_organize_batch(
        &self,
        batch_id: &str,
        operations: Vec<PlannedOperation>,
    ) -> Result<OrganizeBatch> {
        self.initialize().await?;
        let (batch, save) = self.commit(|doc, now| {
            let batch =
                doc.organize.batches.create_or_load(batch_id, operations, now);
            doc.touch_organize(now);
            batch
        });
        settle(save).await?;
        Ok(batch)
    }

    pub async fn mark_organize_op_started(
        &self,
        batch_id: &str,
        index: usize,
    ) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            doc.organize.batches.mark_op_started(batch_id, index);
            doc.touch_organize(now);
        });
        settle(save).await
    }

    pub async fn mark_organize_op_done(
        &self,
        batch_id: &str,
        index: usize,
        patch: Option<OperationPatch>,
    ) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            doc.organize.batches.mark_op_done(batch_id, index, patch);
            doc.touch_organize(now);
        });
        settle(save).await
    }

    pub async fn mark_organize_op_error(
        &self,
        batch_id: &str,
        index: usize,
        message: &str,
    ) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            doc.organize.batches.mark_op_failed(batch_id, index, message);
            doc.touch_organize(now);
        });
        settle(save).await
    }

    pub async fn complete_organize_batch(&self, batch_id: &str) -> Result<()> {
        self.initialize().await?;
        let ((), save) = self.commit(|doc, now| {
            doc.organize.batches.complete(batch_id, now);
            doc.touch_organize(now);
        });
        settle(save).await
    }

    pub async fn get_organize_batch(
        &self,
        batch_id: &str,
    ) -> Result<Option<OrganizeBatch>> {
        self.initialize().await?;
        Ok(self.read(|doc| doc.organize.batches.get(batch_id).cloned()))
    }

    pub async fn get_incomplete_organize_batches(
        &self,
    ) -> Result<Vec<OrganizeBatch>> {
        self.initialize().await?;
        Ok(self.read(|doc| doc.organize.batches.list_incomplete()))
    }

    // ---- maintenance & health ----

    /// Run one sweep pass now and wait for the resulting save, if any.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        self.initialize().await?;
        let report = self.inner.sweep_in_memory(timestamp::now());
        if !report.is_empty() {
            settle(self.inner.schedule_save()).await?;
        }
        Ok(report)
    }

    /// Write the current document immediately, answering every caller that
    /// is waiting on the debounce window. A no-op before initialization.
    pub async fn flush(&self) -> Result<()> {
        if !self.inner.init.initialized() {
            return Ok(());
        }
        self.inner.flush_now().await.map_err(StoreError::from)
    }

    pub fn is_save_healthy(&self) -> bool {
        self.inner.health.is_healthy()
    }

    pub fn last_save_error(&self) -> Option<SaveErrorRecord> {
        self.inner.health.last_error()
    }

    pub fn save_health(&self) -> SaveHealthSnapshot {
        self.inner.health.snapshot()
    }

    /// Stop the scheduler, run a final sweep, and flush. Safe to call more
    /// than once; later calls return immediately.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.shutdown_token.cancel();
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(handle) = sweeper
            && let Err(err) = handle.await
        {
            warn!(target: "state::sweep", error = %err, "sweep scheduler ended abnormally");
        }

        if !self.inner.init.initialized() {
            return Ok(());
        }

        let report = self.inner.sweep_in_memory(timestamp::now());
        if !report.is_empty() {
            info!(target: "state::sweep", removed = report.total(), "final sweep before shutdown");
        }
        self.flush().await?;
        info!(target: "state::load", path = %self.path().display(), "state store shut down");
        Ok(())
    }

    // ---- internals ----

    /// Apply a mutation and register for the save that will cover it, with
    /// no suspension point in between.
    fn commit<R>(
        &self,
        mutation: impl FnOnce(&mut StateDocument, Timestamp) -> R,
    ) -> (R, oneshot::Receiver<SaveOutcome>) {
        let now = timestamp::now();
        let result = {
            let mut doc = self.inner.document.lock();
            mutation(&mut doc, now)
        };
        (result, self.inner.schedule_save())
    }

    fn read<R>(&self, view: impl FnOnce(&StateDocument) -> R) -> R {
        let doc = self.inner.document.lock();
        view(&doc)
    }

    async fn load_and_start(&self) -> Result<()> {
        let path = self.path().to_path_buf();
        let now = timestamp::now();

        let (document, needs_write) = match tokio::fs::read(&path).await {
            Ok(bytes) => match StateDocument::from_slice(&bytes) {
                Ok(doc) => {
                    debug!(target: "state::load", path = %path.display(), "loaded state document");
                    (doc, false)
                }
                Err(err) => {
                    warn!(
                        target: "state::load",
                        path = %path.display(),
                        error = %err,
                        "state file unreadable; starting from an empty document"
                    );
                    quarantine(&path).await;
                    (StateDocument::empty(now), true)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(target: "state::load", path = %path.display(), "no state file yet; creating one");
                (StateDocument::empty(now), true)
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        *self.inner.document.lock() = document;
        let report = self.inner.sweep_in_memory(now);

        if (needs_write || !report.is_empty())
            && let Err(err) = self.inner.flush_now().await
        {
            warn!(target: "state::load", error = %err, "initial state write failed; continuing in memory");
        }

        self.spawn_sweeper();
        Ok(())
    }

    fn spawn_sweeper(&self) {
        let weak = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown_token.clone();
        let period = self.inner.config.sweep_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.scheduled_sweep().await;
                    }
                }
            }
            debug!(target: "state::sweep", "sweep scheduler stopped");
        });

        *self.inner.sweeper.lock() = Some(handle);
    }
}

impl StoreInner {
    /// Register a save request, arming the debounce timer if this request
    /// opened a new window.
    fn schedule_save(self: &Arc<Self>) -> oneshot::Receiver<SaveOutcome> {
        let request = self.coalescer.register();
        if let Some(generation) = request.arm_generation {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(inner.coalescer.window()).await;
                if let Some(waiters) = inner.coalescer.take_window(generation) {
                    let outcome = inner.write_current().await;
                    coalescer::resolve_all(waiters, &outcome);
                }
            });
        }
        request.receiver
    }

    async fn flush_now(&self) -> SaveOutcome {
        let waiters = self.coalescer.take_all();
        let outcome = self.write_current().await;
        coalescer::resolve_all(waiters, &outcome);
        outcome
    }

    /// Snapshot and write inside the serializer's turn, so the newest state
    /// is always the last one written.
    async fn write_current(&self) -> SaveOutcome {
        self.serializer
            .enqueue(|| async {
                let snapshot = {
                    let mut doc = self.document.lock();
                    doc.updated_at = Some(timestamp::now());
                    doc.clone()
                };
                let outcome = self.writer.write(&snapshot).await;
                self.health.record(&outcome);
                if outcome.is_ok() {
                    debug!(target: "state::save", path = %self.writer.path().display(), "state saved");
                }
                outcome
            })
            .await
    }

    fn sweep_in_memory(&self, now: Timestamp) -> SweepReport {
        let report = {
            let mut doc = self.document.lock();
            sweep(&mut doc, &self.config.retention, now)
        };
        if !report.is_empty() {
            info!(
                target: "state::sweep",
                jobs = report.jobs_expired,
                ready_expired = report.ready_expired,
                ready_over_cap = report.ready_over_cap,
                batches = report.batches_expired,
                "evicted stale state entries"
            );
        }
        report
    }

    async fn scheduled_sweep(self: &Arc<Self>) {
        let report = self.sweep_in_memory(timestamp::now());
        if report.is_empty() {
            return;
        }
        if let Err(err) = coalescer::wait(self.schedule_save()).await {
            warn!(target: "state::sweep", error = %err, "saving after sweep failed");
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

async fn settle(save: oneshot::Receiver<SaveOutcome>) -> Result<()> {
    coalescer::wait(save).await.map_err(StoreError::from)
}

async fn file_meta(path: &str) -> FileMeta {
    tokio::fs::metadata(path)
        .await
        .map(|meta| FileMeta::from_metadata(&meta))
        .unwrap_or_default()
}

/// Move an unreadable state file aside so it can be inspected later.
async fn quarantine(path: &Path) {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    let aside = path.with_file_name(format!(
        "{file_name}.corrupt-{}",
        timestamp::now().timestamp_millis()
    ));
    match tokio::fs::rename(path, &aside).await {
        Ok(()) => {
            warn!(target: "state::load", kept = %aside.display(), "previous state file kept for inspection");
        }
        Err(err) => {
            warn!(target: "state::load", error = %err, "could not move unreadable state file aside");
        }
    }
}
