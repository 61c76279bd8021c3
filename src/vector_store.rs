use std::{
    collections::HashSet,
    path::Path,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use redb::{
    Database,
    ReadOnlyTable,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    note::NoteMetadata,
    similarity::{SimilarityResult, cosine_similarity, rank},
};

const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
const METADATA: TableDefinition<&str, &[u8]> =
    TableDefinition::new("metadata");
const STORE_INFO: TableDefinition<&str, u64> =
    TableDefinition::new("store_info");

const LAST_UPDATED_KEY: &str = "last_updated";

const F32_SIZE: usize = std::mem::size_of::<f32>();

/// Bytes per float assumed by the advisory storage estimate.
const ESTIMATED_BYTES_PER_FLOAT: u64 = 8;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Filtering for [`VectorStore::find_similar`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Results scoring below this are dropped.
    pub threshold: f32,
    pub exclude_ids: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            threshold: DEFAULT_THRESHOLD,
            exclude_ids: Vec::new(),
        }
    }
}

/// A stored embedding with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: NoteMetadata,
    /// When the record was written, in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// One entry of a [`VectorStore::batch_put`] call.
#[derive(Debug, Clone)]
pub struct StoreItem {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: NoteMetadata,
}

/// Per-item result of a [`VectorStore::batch_put`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub id: String,
    pub error: Option<String>,
}

impl PutOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_count: u64,
    /// Length of the stored vectors, 0 when the store is empty.
    pub dimensions: usize,
    /// Rough size of the vectors alone, ignoring metadata and overhead.
    pub estimated_storage_bytes: u64,
    pub last_updated: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordInfo {
    metadata: NoteMetadata,
    timestamp: u64,
}

/// Durable map from note id to embedding and metadata.
///
/// Two redb tables share the note id as key: `vectors` holds the raw
/// `f32` components, `metadata` holds a JSON blob with the note metadata
/// and the write timestamp. Every mutation touches both tables in one
/// write transaction, so a record is either fully present or absent.
///
/// The database handle is opened once and shared; each operation runs
/// its transaction on the blocking thread pool.
#[derive(Clone)]
pub struct VectorStore {
    db: Arc<Database>,
}

impl VectorStore {
    /// Open or create a vector store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(METADATA)?;
        txn.open_table(STORE_INFO)?;
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db)).await?
    }

    /// Insert or replace the record for `id`.
    pub async fn put(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: NoteMetadata,
    ) -> Result<()> {
        let id = id.to_string();
        self.run(move |db| {
            let timestamp = now_millis();
            let info = encode_info(metadata, timestamp)?;

            let txn = db.begin_write()?;
            {
                let mut vectors = txn.open_table(VECTORS)?;
                let mut meta = txn.open_table(METADATA)?;
                vectors.insert(id.as_str(), encode_vector(&embedding))?;
                meta.insert(id.as_str(), info.as_slice())?;
            }
            set_last_updated(&txn, timestamp)?;
            txn.commit()?;
            Ok(())
        })
        .await
    }

    /// Replace the embedding for `id`.
    ///
    /// When `metadata` is `None` the stored metadata is kept; if there is
    /// no stored record to keep it from, this fails with
    /// [`Error::NotFound`] and nothing is written.
    pub async fn update(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: Option<NoteMetadata>,
    ) -> Result<()> {
        let id = id.to_string();
        self.run(move |db| {
            let timestamp = now_millis();

            let txn = db.begin_write()?;
            {
                let mut vectors = txn.open_table(VECTORS)?;
                let mut meta = txn.open_table(METADATA)?;

                let metadata = match metadata {
                    Some(metadata) => metadata,
                    None => {
                        let existing = meta
                            .get(id.as_str())?
                            .map(|guard| guard.value().to_vec());
                        match existing {
                            Some(bytes) => decode_info(&id, &bytes)?.metadata,
                            None => {
                                return Err(Error::NotFound {
                                    kind: "embedding",
                                    name: id,
                                });
                            }
                        }
                    }
                };

                let info = encode_info(metadata, timestamp)?;
                vectors.insert(id.as_str(), encode_vector(&embedding))?;
                meta.insert(id.as_str(), info.as_slice())?;
            }
            set_last_updated(&txn, timestamp)?;
            txn.commit()?;
            Ok(())
        })
        .await
    }

    /// Delete the record for `id`. Returns whether a record existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |db| {
            let txn = db.begin_write()?;
            let removed = {
                let mut vectors = txn.open_table(VECTORS)?;
                let mut meta = txn.open_table(METADATA)?;
                let had_vector = vectors.remove(id.as_str())?.is_some();
                let had_meta = meta.remove(id.as_str())?.is_some();
                had_vector || had_meta
            };
            if removed {
                set_last_updated(&txn, now_millis())?;
            }
            txn.commit()?;
            Ok(removed)
        })
        .await
    }

    pub async fn has(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.run(move |db| {
            let txn = db.begin_read()?;
            let vectors = txn.open_table(VECTORS)?;
            Ok(vectors.get(id.as_str())?.is_some())
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        let id = id.to_string();
        self.run(move |db| {
            let txn = db.begin_read()?;
            let vectors = txn.open_table(VECTORS)?;
            let Some(guard) = vectors.get(id.as_str())? else {
                return Ok(None);
            };
            let embedding = decode_vector(&id, guard.value())?;

            let meta = txn.open_table(METADATA)?;
            let info = load_info(&meta, &id)?;

            Ok(Some(EmbeddingRecord {
                id,
                embedding,
                metadata: info.metadata,
                timestamp: info.timestamp,
            }))
        })
        .await
    }

    /// Store many records in a single transaction.
    ///
    /// Items with an empty id, an empty embedding or non-finite components
    /// are rejected individually and reported in their [`PutOutcome`];
    /// the rest are committed together. A storage failure fails the whole
    /// call and nothing is committed.
    pub async fn batch_put(
        &self,
        items: Vec<StoreItem>,
    ) -> Result<Vec<PutOutcome>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.run(move |db| {
            let timestamp = now_millis();
            let mut outcomes = Vec::with_capacity(items.len());

            let txn = db.begin_write()?;
            {
                let mut vectors = txn.open_table(VECTORS)?;
                let mut meta = txn.open_table(METADATA)?;
                for item in items {
                    let error = match validate_item(&item) {
                        Err(reason) => Some(reason),
                        Ok(()) => match encode_info(item.metadata, timestamp) {
                            Err(e) => Some(e.to_string()),
                            Ok(info) => {
                                vectors.insert(
                                    item.id.as_str(),
                                    encode_vector(&item.embedding),
                                )?;
                                meta.insert(item.id.as_str(), info.as_slice())?;
                                None
                            }
                        },
                    };
                    outcomes.push(PutOutcome { id: item.id, error });
                }
            }
            if outcomes.iter().any(PutOutcome::is_ok) {
                set_last_updated(&txn, timestamp)?;
            }
            txn.commit()?;
            Ok(outcomes)
        })
        .await
    }

    /// Brute-force nearest neighbours of `query`.
    ///
    /// Scores every stored vector not listed in `exclude_ids`, keeps those
    /// at or above `threshold`, and returns the best `limit` of them,
    /// highest score first.
    pub async fn find_similar(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SimilarityResult>> {
        let query = query.to_vec();
        let options = options.clone();
        self.run(move |db| {
            let excluded: HashSet<&str> =
                options.exclude_ids.iter().map(String::as_str).collect();

            let txn = db.begin_read()?;
            let vectors = txn.open_table(VECTORS)?;

            let mut scored = Vec::new();
            for entry in vectors.iter()? {
                let (key, value) = entry?;
                let id = key.value();
                if excluded.contains(id) {
                    continue;
                }
                let embedding = decode_vector(id, value.value())?;
                let score = cosine_similarity(&query, &embedding)?;
                if score >= options.threshold {
                    scored.push((id.to_string(), score));
                }
            }

            let meta = txn.open_table(METADATA)?;
            let mut results = Vec::with_capacity(scored.len());
            for (id, score) in scored {
                let info = load_info(&meta, &id)?;
                results.push(SimilarityResult {
                    id,
                    score,
                    metadata: info.metadata,
                });
            }

            Ok(rank(results, options.limit))
        })
        .await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.run(|db| {
            let txn = db.begin_read()?;
            let vectors = txn.open_table(VECTORS)?;
            let total_count = vectors.len()?;
            let dimensions = match vectors.first()? {
                Some((_, value)) => value.value().len() / F32_SIZE,
                None => 0,
            };

            let info = txn.open_table(STORE_INFO)?;
            let last_updated =
                info.get(LAST_UPDATED_KEY)?.map(|guard| guard.value());

            Ok(StoreStats {
                total_count,
                dimensions,
                estimated_storage_bytes: total_count
                    * dimensions as u64
                    * ESTIMATED_BYTES_PER_FLOAT,
                last_updated,
            })
        })
        .await
    }

    /// List all stored note ids.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        self.run(|db| {
            let txn = db.begin_read()?;
            let vectors = txn.open_table(VECTORS)?;
            let mut ids = Vec::new();
            for entry in vectors.iter()? {
                let (key, _) = entry?;
                ids.push(key.value().to_string());
            }
            Ok(ids)
        })
        .await
    }

    /// Stored metadata for every record, keyed by id.
    pub async fn list_metadata(&self) -> Result<Vec<(String, NoteMetadata)>> {
        self.run(|db| {
            let txn = db.begin_read()?;
            let meta = txn.open_table(METADATA)?;
            let mut entries = Vec::new();
            for entry in meta.iter()? {
                let (key, value) = entry?;
                let id = key.value();
                let info = decode_info(id, value.value())?;
                entries.push((id.to_string(), info.metadata));
            }
            Ok(entries)
        })
        .await
    }

    /// Remove every record.
    pub async fn clear(&self) -> Result<()> {
        self.run(|db| {
            let txn = db.begin_write()?;
            txn.delete_table(VECTORS)?;
            txn.delete_table(METADATA)?;
            txn.open_table(VECTORS)?;
            txn.open_table(METADATA)?;
            set_last_updated(&txn, now_millis())?;
            txn.commit()?;
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore").finish_non_exhaustive()
    }
}

fn validate_item(item: &StoreItem) -> std::result::Result<(), String> {
    if item.id.is_empty() {
        return Err("empty id".to_string());
    }
    if item.embedding.is_empty() {
        return Err("empty embedding".to_string());
    }
    if item.embedding.iter().any(|x| !x.is_finite()) {
        return Err("embedding contains non-finite values".to_string());
    }
    Ok(())
}

fn encode_vector(embedding: &[f32]) -> &[u8] {
    bytemuck::cast_slice(embedding)
}

fn decode_vector(id: &str, bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % F32_SIZE != 0 {
        return Err(Error::CorruptRecord {
            id: id.to_string(),
            reason: format!(
                "vector length {} is not a multiple of {F32_SIZE}",
                bytes.len()
            ),
        });
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

fn encode_info(metadata: NoteMetadata, timestamp: u64) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&RecordInfo {
        metadata,
        timestamp,
    })?)
}

fn decode_info(id: &str, bytes: &[u8]) -> Result<RecordInfo> {
    serde_json::from_slice(bytes).map_err(|e| Error::CorruptRecord {
        id: id.to_string(),
        reason: format!("unreadable metadata: {e}"),
    })
}

fn load_info(
    table: &ReadOnlyTable<&'static str, &'static [u8]>,
    id: &str,
) -> Result<RecordInfo> {
    match table.get(id)? {
        Some(guard) => decode_info(id, guard.value()),
        None => Err(Error::CorruptRecord {
            id: id.to_string(),
            reason: "metadata missing".to_string(),
        }),
    }
}

fn set_last_updated(txn: &WriteTransaction, timestamp: u64) -> Result<()> {
    let mut info = txn.open_table(STORE_INFO)?;
    info.insert(LAST_UPDATED_KEY, timestamp)?;
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
