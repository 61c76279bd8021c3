use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    embedder::Embedder,
    error::{Error, Result},
    markdown::document_text,
    note::Note,
};

/// How long a cached document embedding stays valid.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache size above which expired entries are pruned.
pub const CACHE_SOFT_CAP: usize = 1000;

struct CacheEntry {
    embedding: Vec<f32>,
    cached_at: Instant,
}

type CacheKey = (String, u64);

/// Result of [`EmbeddingService::batch_embed_documents`].
#[derive(Debug, Default)]
pub struct BatchEmbeddings {
    pub embeddings: HashMap<String, Vec<f32>>,
    /// Notes that could not be embedded, with the reason.
    pub failures: Vec<(String, Error)>,
}

/// Turns notes and queries into vectors.
///
/// Document embeddings are cached by `(note id, updated_at)`, so an edit
/// naturally misses the cache. Queries are never cached.
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    soft_cap: usize,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_cache_policy(embedder, CACHE_TTL, CACHE_SOFT_CAP)
    }

    pub fn with_cache_policy(
        embedder: Arc<dyn Embedder>,
        ttl: Duration,
        soft_cap: usize,
    ) -> Self {
        Self {
            embedder,
            cache: Mutex::new(HashMap::new()),
            ttl,
            soft_cap,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.embedder.initialize().await
    }

    pub fn is_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Embed a note from its weighted text, using the cache when possible.
    pub async fn embed_document(&self, note: &Note) -> Result<Vec<f32>> {
        let key = (note.id.clone(), note.updated_at);
        if let Some(hit) = self.cached(&key) {
            debug!(id = %note.id, "embedding cache hit");
            return Ok(hit);
        }

        let embedding = self.embedder.embed(&document_text(note)).await?;
        self.store_cached(key, embedding.clone());
        Ok(embedding)
    }

    /// Embed raw query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    /// Embed notes one by one. A note that fails is logged and left out.
    pub async fn batch_embed_documents(
        &self,
        notes: &[Note],
    ) -> BatchEmbeddings {
        let mut batch = BatchEmbeddings::default();
        for note in notes {
            match self.embed_document(note).await {
                Ok(embedding) => {
                    batch.embeddings.insert(note.id.clone(), embedding);
                }
                Err(e) => {
                    warn!(id = %note.id, error = %e, "failed to embed note");
                    batch.failures.push((note.id.clone(), e));
                }
            }
        }
        batch
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<Vec<f32>> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.embedding.clone())
    }

    fn store_cached(&self, key: CacheKey, embedding: Vec<f32>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        cache.insert(
            key,
            CacheEntry {
                embedding,
                cached_at: Instant::now(),
            },
        );
        if cache.len() > self.soft_cap {
            let before = cache.len();
            let ttl = self.ttl;
            cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
            debug!(pruned = before - cache.len(), "pruned embedding cache");
        }
    }
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("dimensions", &self.dimensions())
            .field("cached", &self.cache_len())
            .finish_non_exhaustive()
    }
}
