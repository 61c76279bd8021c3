use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    embedder::{Embedder, normalize},
    error::{Error, Result},
    note::Note,
};

pub const MOCK_DIMENSIONS: usize = 64;

/// Any text containing this marker fails to embed.
pub const FAIL_MARKER: &str = "FAIL_EMBED";

/// Any text containing this marker suspends for [`SLOW_EMBED_DELAY`]
/// before it is embedded, so other tasks get to run meanwhile.
pub const SLOW_MARKER: &str = "SLOW_EMBED";

pub const SLOW_EMBED_DELAY: Duration = Duration::from_millis(30);

/// Deterministic embedder for tests: bag of lowercase words hashed into a
/// small vector, then normalized. Shared words mean similar vectors.
pub struct MockEmbedder {
    pub calls: AtomicUsize,
    ready: AtomicBool,
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::with_dimensions(MOCK_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            dimensions,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    hash_embed_into(text, MOCK_DIMENSIONS)
}

fn hash_embed_into(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        vector[(hash % dimensions as u64) as usize] += 1.0;
    }
    normalize(vector)
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn initialize(&self) -> Result<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        if text.contains(SLOW_MARKER) {
            tokio::time::sleep(SLOW_EMBED_DELAY).await;
        }
        if text.contains(FAIL_MARKER) {
            return Err(Error::Embedding(format!(
                "refusing to embed '{}'",
                text.lines().next().unwrap_or_default()
            )));
        }
        Ok(hash_embed_into(text, self.dimensions))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}

pub fn note(id: &str, content: &str) -> Note {
    Note {
        id: id.to_string(),
        name: id.trim_end_matches(".md").to_string(),
        content: content.to_string(),
        tags: Vec::new(),
        folder: None,
        updated_at: 1_000,
        word_count: Some(content.split_whitespace().count()),
    }
}
