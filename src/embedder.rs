use std::{
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_MODEL_ID: &str = "all-MiniLM-L6-v2";
pub const MODEL_ENV_VAR: &str = "NOTEVEC_MODEL";

/// Token budget of the supported local models.
pub const MAX_INPUT_TOKENS: usize = 512;

/// Approximate characters per token for English text.
const CHARS_PER_TOKEN: usize = 4;

/// Input longer than this is cut before it reaches the model.
pub const MAX_INPUT_CHARS: usize = MAX_INPUT_TOKENS * CHARS_PER_TOKEN;

/// Number of texts handed to the model per inference call.
pub const EMBED_BATCH_SIZE: usize = 10;

/// A text-to-vector model.
///
/// Implementations own their model handle and its lifecycle. Everything
/// downstream (the embedding service, the vector store, the indexing
/// service) only sees this trait, so a remote provider can replace the
/// local one without touching them.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Load the model. Calling this again after success is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// Embed one text into a unit-length vector of [`Self::dimensions`]
    /// components, initializing the model first if needed.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts, preserving input order.
    ///
    /// Fails as a whole on the first text that cannot be embedded.
    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    /// `true` once the model is loaded and until it is disposed.
    fn is_ready(&self) -> bool;

    /// Release the model. The next `embed` loads it again.
    async fn dispose(&self);
}

enum ModelState {
    Unloaded,
    Ready(Arc<Mutex<TextEmbedding>>),
    Failed(String),
}

/// Local ONNX embedder backed by fastembed.
///
/// The model is downloaded into `cache_dir` on first use and kept in
/// memory until [`Embedder::dispose`]. A failed load is sticky: further
/// calls report the same [`Error::ModelLoad`] until the embedder is
/// disposed.
pub struct LocalEmbedder {
    model_id: String,
    kind: fastembed::EmbeddingModel,
    dimensions: usize,
    cache_dir: PathBuf,
    state: tokio::sync::Mutex<ModelState>,
    ready: AtomicBool,
    load_attempts: AtomicUsize,
}

impl LocalEmbedder {
    /// Creates an embedder for the model named by `NOTEVEC_MODEL`, or
    /// `all-MiniLM-L6-v2` when the variable is unset.
    ///
    /// Nothing is loaded until the first `initialize` or `embed`.
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        Self::with_model_id(&model_id, cache_dir)
    }

    /// Creates an embedder for an explicit model name.
    pub fn with_model_id(model_id: &str, cache_dir: PathBuf) -> Result<Self> {
        let (kind, dimensions) = resolve_model(model_id)?;
        Ok(Self {
            model_id: model_id.to_string(),
            kind,
            dimensions,
            cache_dir,
            state: tokio::sync::Mutex::new(ModelState::Unloaded),
            ready: AtomicBool::new(false),
            load_attempts: AtomicUsize::new(0),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Number of times a model load was started, successful or not.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Returns the loaded model, loading it if necessary.
    ///
    /// The state lock is held for the whole load, so concurrent callers
    /// wait for the in-flight load instead of starting their own.
    async fn loaded_model(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        let mut state = self.state.lock().await;
        match &*state {
            ModelState::Ready(model) => return Ok(Arc::clone(model)),
            ModelState::Failed(reason) => {
                return Err(Error::ModelLoad(reason.clone()));
            }
            ModelState::Unloaded => {}
        }

        info!(model = %self.model_id, "loading embedding model");
        self.load_attempts.fetch_add(1, Ordering::SeqCst);
        let kind = self.kind.clone();
        let cache_dir = self.cache_dir.clone();
        let loaded = tokio::task::spawn_blocking(
            move || -> std::result::Result<TextEmbedding, String> {
                std::fs::create_dir_all(&cache_dir).map_err(|e| {
                    format!(
                        "cannot create model cache {}: {e}",
                        cache_dir.display()
                    )
                })?;
                let options = InitOptions::new(kind)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(false);
                TextEmbedding::try_new(options).map_err(|e| e.to_string())
            },
        )
        .await
        .unwrap_or_else(|e| Err(e.to_string()));

        match loaded {
            Ok(model) => {
                let model = Arc::new(Mutex::new(model));
                *state = ModelState::Ready(Arc::clone(&model));
                self.ready.store(true, Ordering::SeqCst);
                info!(model = %self.model_id, "embedding model ready");
                Ok(model)
            }
            Err(reason) => {
                *state = ModelState::Failed(reason.clone());
                Err(Error::ModelLoad(reason))
            }
        }
    }

    /// Runs one inference call and normalizes its output.
    async fn run_model(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.loaded_model().await?;
        let expected = inputs.len();

        let raw = tokio::task::spawn_blocking(
            move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().map_err(|_| {
                    Error::Embedding("model lock poisoned".to_string())
                })?;
                guard
                    .embed(inputs, None)
                    .map_err(|e| Error::Embedding(e.to_string()))
            },
        )
        .await
        .map_err(|e| Error::Embedding(e.to_string()))??;

        if raw.len() != expected {
            return Err(Error::Embedding(format!(
                "model returned {} embeddings for {expected} inputs",
                raw.len()
            )));
        }

        raw.into_iter()
            .map(|vector| {
                if vector.len() != self.dimensions {
                    return Err(Error::DimensionMismatch {
                        expected: self.dimensions,
                        actual: vector.len(),
                    });
                }
                Ok(normalize(vector))
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn initialize(&self) -> Result<()> {
        self.loaded_model().await.map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors =
            self.run_model(vec![truncate_input(text).to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            Error::Embedding("model returned no embedding".to_string())
        })
    }

    async fn batch_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let inputs = chunk
                .iter()
                .map(|text| truncate_input(text).to_string())
                .collect();
            vectors.extend(self.run_model(inputs).await?);
            debug!(done = vectors.len(), total = texts.len(), "embedded batch");
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        let mut state = self.state.lock().await;
        *state = ModelState::Unloaded;
        self.ready.store(false, Ordering::SeqCst);
        debug!(model = %self.model_id, "embedding model released");
    }
}

impl std::fmt::Debug for LocalEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEmbedder")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .field("ready", &self.is_ready())
            .field("load_attempts", &self.load_attempts())
            .finish_non_exhaustive()
    }
}

/// Maps a model name to its fastembed variant and output dimensionality.
fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as Model;

    let resolved = match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => (Model::AllMiniLML6V2, 384),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => (Model::AllMiniLML6V2Q, 384),
        "bge-small-en-v1.5" | "bgesmallenv15" => (Model::BGESmallENV15, 384),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
            (Model::BGESmallENV15Q, 384)
        }
        "bge-base-en-v1.5" | "bgebaseenv15" => (Model::BGEBaseENV15, 768),
        "bge-base-en-v1.5-q" | "bgebaseenv15q" => (Model::BGEBaseENV15Q, 768),
        "bge-large-en-v1.5" | "bgelargeenv15" => (Model::BGELargeENV15, 1024),
        "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
            (Model::BGELargeENV15Q, 1024)
        }
        _ => {
            return Err(Error::Config(format!(
                "unknown embedding model '{name}'; supported: all-MiniLM-L6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 \
                 (add -q for quantized)"
            )));
        }
    };
    Ok(resolved)
}

/// Cuts `text` to at most [`MAX_INPUT_CHARS`] characters.
pub fn truncate_input(text: &str) -> &str {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Scales `vector` to unit length. Zero vectors are returned unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}
