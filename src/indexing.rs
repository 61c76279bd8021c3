use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    embedding::EmbeddingService,
    error::{Error, Result},
    note::Note,
    vector_store::{StoreItem, VectorStore},
};

pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// Notes embedded and written per store transaction.
    pub batch_size: usize,
    /// Re-embed notes that already have a stored embedding.
    pub force_reindex: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            force_reindex: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexingState {
    Idle,
    /// A bulk `index_all` run is in progress.
    Indexing,
    /// Single notes from the queue are being processed.
    QueueDraining,
}

/// Snapshot returned by [`IndexingService::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingStatus {
    pub is_indexing: bool,
    pub queue_length: usize,
    /// Notes handled since the last reset, including ones that failed.
    pub total_processed: usize,
    pub last_error: Option<String>,
}

/// Outcome of one [`IndexingService::index_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Notes handled, stored or not.
    pub processed: usize,
    /// Notes selected for this run after the incremental filter.
    pub total: usize,
    pub failed: usize,
    pub aborted: bool,
}

/// Differences between a note collection and the stored records.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Notes with no stored record.
    pub new: Vec<Note>,
    /// Notes whose stored `updated_at` differs.
    pub changed: Vec<Note>,
    /// Stored ids missing from the collection.
    pub deleted: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.changed.is_empty()
            && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub index: IndexReport,
}

/// Compare `notes` against what the store holds.
pub async fn plan_sync(
    store: &VectorStore,
    notes: &[Note],
) -> Result<SyncPlan> {
    let mut known: HashMap<String, u64> = store
        .list_metadata()
        .await?
        .into_iter()
        .map(|(id, meta)| (id, meta.updated_at))
        .collect();

    let mut plan = SyncPlan::default();
    for note in notes {
        match known.remove(&note.id) {
            None => plan.new.push(note.clone()),
            Some(stored) if stored != note.updated_at => {
                plan.changed.push(note.clone());
            }
            Some(_) => {}
        }
    }

    plan.deleted = known.into_keys().collect();
    plan.deleted.sort();
    Ok(plan)
}

struct Inner {
    state: IndexingState,
    /// Set from the moment `index_all` is accepted until it returns,
    /// including while it waits for a queue drain to finish.
    bulk_reserved: bool,
    queue: VecDeque<Note>,
    total_processed: usize,
    last_error: Option<String>,
}

/// Keeps the vector store in step with a changing note collection.
///
/// A bulk run and a queue drain each hold the activity lock for their whole
/// duration, so at most one of them runs and there is never more than one
/// drainer. Notes queued while either runs are processed in FIFO order by
/// the current drainer, or by a drain started when the bulk run finishes.
/// Every store write issued here goes through one writer lock, so
/// `update_document` and `remove_document` never interleave inside a batch.
pub struct IndexingService {
    embeddings: Arc<EmbeddingService>,
    store: VectorStore,
    inner: Mutex<Inner>,
    abort: AtomicBool,
    activity: tokio::sync::Mutex<()>,
    writer: tokio::sync::Mutex<()>,
}

/// Releases a bulk reservation when `index_all` ends, including when its
/// future is dropped.
struct BulkGuard<'a> {
    service: &'a IndexingService,
}

impl Drop for BulkGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.service.inner();
        inner.bulk_reserved = false;
        if inner.state == IndexingState::Indexing {
            inner.state = IndexingState::Idle;
        }
    }
}

/// Returns the service to `Idle` if a drain ends without doing so itself.
struct DrainGuard<'a> {
    service: &'a IndexingService,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.service.inner();
        if inner.state == IndexingState::QueueDraining {
            inner.state = IndexingState::Idle;
        }
    }
}

impl IndexingService {
    pub fn new(embeddings: Arc<EmbeddingService>, store: VectorStore) -> Self {
        Self {
            embeddings,
            store,
            inner: Mutex::new(Inner {
                state: IndexingState::Idle,
                bulk_reserved: false,
                queue: VecDeque::new(),
                total_processed: 0,
                last_error: None,
            }),
            abort: AtomicBool::new(false),
            activity: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, error: &Error) {
        self.inner().last_error = Some(error.to_string());
    }

    /// Fails unless the embedder's vectors have the length of the ones
    /// already stored. An empty store accepts any length.
    pub async fn check_dimensions(&self) -> Result<()> {
        let stored = self.store.stats().await?.dimensions;
        let produced = self.embeddings.dimensions();
        if stored != 0 && stored != produced {
            return Err(Error::DimensionMismatch {
                expected: stored,
                actual: produced,
            });
        }
        Ok(())
    }

    /// Embed and store `notes` in batches.
    ///
    /// Unless `force_reindex` is set, notes that already have a stored
    /// embedding are skipped. `on_progress(processed, total, last_name)`
    /// runs after every batch. A note that fails to embed is logged and
    /// skipped; a store failure ends the run with an error.
    ///
    /// Fails with [`Error::IndexingInProgress`] while another bulk run is
    /// active, and with [`Error::DimensionMismatch`] when the embedder does
    /// not match the stored vectors. A queue drain in progress is waited
    /// for. [`abort`](Self::abort) stops the run before its next batch.
    /// Notes queued by [`index_document`](Self::index_document) meanwhile
    /// are processed before this returns.
    pub async fn index_all<F>(
        &self,
        notes: Vec<Note>,
        options: &IndexOptions,
        on_progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(usize, usize, Option<&str>),
    {
        let bulk = {
            let mut inner = self.inner();
            if inner.bulk_reserved {
                return Err(Error::IndexingInProgress);
            }
            inner.bulk_reserved = true;
            BulkGuard { service: self }
        };

        let report = {
            let _activity = self.activity.lock().await;
            self.inner().state = IndexingState::Indexing;
            self.abort.store(false, Ordering::SeqCst);
            match self.check_dimensions().await {
                Ok(()) => self.run_bulk(notes, options, on_progress).await,
                Err(e) => Err(e),
            }
        };
        drop(bulk);

        let drained = self.drain_queue().await;
        let report = report?;
        drained?;
        Ok(report)
    }

    async fn run_bulk<F>(
        &self,
        notes: Vec<Note>,
        options: &IndexOptions,
        mut on_progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(usize, usize, Option<&str>),
    {
        let candidates = notes.len();
        let pending = if options.force_reindex {
            notes
        } else {
            let mut pending = Vec::with_capacity(notes.len());
            for note in notes {
                if !self.store.has(&note.id).await? {
                    pending.push(note);
                }
            }
            pending
        };

        let mut report = IndexReport {
            total: pending.len(),
            ..IndexReport::default()
        };
        info!(
            total = report.total,
            skipped = candidates - report.total,
            "indexing notes"
        );

        for batch in pending.chunks(options.batch_size.max(1)) {
            if self.abort.load(Ordering::SeqCst) {
                info!(
                    processed = report.processed,
                    total = report.total,
                    "indexing aborted"
                );
                report.aborted = true;
                break;
            }

            let embedded = self.embeddings.batch_embed_documents(batch).await;
            if let Some((_, error)) = embedded.failures.last() {
                self.record_error(error);
            }
            report.failed += embedded.failures.len();

            let items: Vec<StoreItem> = batch
                .iter()
                .filter_map(|note| {
                    embedded.embeddings.get(&note.id).map(|embedding| {
                        StoreItem {
                            id: note.id.clone(),
                            embedding: embedding.clone(),
                            metadata: note.metadata(),
                        }
                    })
                })
                .collect();

            let outcomes = {
                let _writer = self.writer.lock().await;
                self.store.batch_put(items).await?
            };
            for outcome in outcomes.iter().filter(|o| !o.is_ok()) {
                let reason = outcome.error.as_deref().unwrap_or_default();
                warn!(id = %outcome.id, reason, "note rejected by store");
                self.inner().last_error =
                    Some(format!("{}: {reason}", outcome.id));
                report.failed += 1;
            }

            report.processed += batch.len();
            self.inner().total_processed += batch.len();
            on_progress(
                report.processed,
                report.total,
                batch.last().map(|note| note.name.as_str()),
            );
        }

        debug!(?report, "indexing run finished");
        Ok(report)
    }

    /// Queue one note and process the queue unless another activity owns
    /// it, in which case the note waits for that activity to finish.
    pub async fn index_document(&self, note: Note) -> Result<()> {
        debug!(id = %note.id, "queueing note");
        self.inner().queue.push_back(note);
        self.drain_queue().await
    }

    async fn drain_queue(&self) -> Result<()> {
        let mut guard = {
            let mut inner = self.inner();
            if inner.state != IndexingState::Idle
                || inner.bulk_reserved
                || inner.queue.is_empty()
            {
                return Ok(());
            }
            inner.state = IndexingState::QueueDraining;
            DrainGuard {
                service: self,
                armed: true,
            }
        };
        let _activity = self.activity.lock().await;

        loop {
            let note = {
                let mut inner = self.inner();
                match inner.queue.pop_front() {
                    Some(note) => note,
                    None => {
                        // Same lock as the push in `index_document`, so a
                        // note queued after this starts a fresh drain.
                        inner.state = IndexingState::Idle;
                        guard.armed = false;
                        return Ok(());
                    }
                }
            };

            match self.embed_and_store(&note).await {
                Ok(()) => {}
                Err(e) if e.is_store_io() => {
                    warn!(id = %note.id, error = %e, "failed to store note");
                    let mut inner = self.inner();
                    inner.last_error = Some(e.to_string());
                    inner.queue.push_front(note);
                    return Err(e);
                }
                Err(e) => {
                    warn!(id = %note.id, error = %e, "failed to index note");
                    self.record_error(&e);
                }
            }
            self.inner().total_processed += 1;
        }
    }

    async fn embed_and_store(&self, note: &Note) -> Result<()> {
        let embedding = self.embeddings.embed_document(note).await?;
        let _writer = self.writer.lock().await;
        self.check_dimensions().await?;
        self.store.put(&note.id, embedding, note.metadata()).await
    }

    /// Re-embed a note and replace its stored record right away.
    pub async fn update_document(&self, note: &Note) -> Result<()> {
        let embedding = self.embeddings.embed_document(note).await?;
        let _writer = self.writer.lock().await;
        self.check_dimensions().await?;
        self.store
            .update(&note.id, embedding, Some(note.metadata()))
            .await
    }

    /// Delete a note's record and any queued copies of it.
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        self.inner().queue.retain(|note| note.id != id);
        let _writer = self.writer.lock().await;
        let removed = self.store.remove(id).await?;
        debug!(id, removed, "removed note");
        Ok(removed)
    }

    /// Bring the store in line with `notes`: embed new and changed notes,
    /// drop records of notes that no longer exist. With `force_reindex`
    /// every note in `notes` is embedded again.
    pub async fn sync<F>(
        &self,
        notes: &[Note],
        options: &IndexOptions,
        on_progress: F,
    ) -> Result<SyncReport>
    where
        F: FnMut(usize, usize, Option<&str>),
    {
        if self.inner().bulk_reserved {
            return Err(Error::IndexingInProgress);
        }
        self.check_dimensions().await?;

        let plan = plan_sync(&self.store, notes).await?;
        info!(
            new = plan.new.len(),
            changed = plan.changed.len(),
            deleted = plan.deleted.len(),
            "sync plan"
        );

        let mut removed = 0;
        for id in &plan.deleted {
            if self.remove_document(id).await? {
                removed += 1;
            }
        }

        let added = plan.new.len();
        let changed = plan.changed.len();
        let pending = if options.force_reindex {
            notes.to_vec()
        } else {
            let mut pending = plan.new;
            pending.extend(plan.changed);
            pending
        };

        let options = IndexOptions {
            force_reindex: true,
            ..options.clone()
        };
        let index = self.index_all(pending, &options, on_progress).await?;

        Ok(SyncReport {
            added,
            changed,
            removed,
            index,
        })
    }

    /// Ask a running `index_all` to stop before its next batch.
    pub fn abort(&self) {
        debug!("abort requested");
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> IndexingState {
        self.inner().state
    }

    pub fn status(&self) -> IndexingStatus {
        let inner = self.inner();
        IndexingStatus {
            is_indexing: inner.state == IndexingState::Indexing,
            queue_length: inner.queue.len(),
            total_processed: inner.total_processed,
            last_error: inner.last_error.clone(),
        }
    }

    /// Zero the processed count and forget the last error.
    pub fn reset_status(&self) {
        let mut inner = self.inner();
        inner.total_processed = 0;
        inner.last_error = None;
    }
}

impl std::fmt::Debug for IndexingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingService")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
