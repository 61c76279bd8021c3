use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use notevec::{
    EmbeddingService,
    Embedder,
    IndexOptions,
    IndexingService,
    LocalEmbedder,
    Note,
    Result,
    SearchOptions,
    VectorStore,
    embedder::normalize,
    notes::load_notes,
    search::semantic_search,
};

/// Counts word occurrences into a fixed set of buckets.
struct WordBuckets;

#[async_trait]
impl Embedder for WordBuckets {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 32];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
            vector[(bucket % 32) as usize] += 1.0;
        }
        Ok(normalize(vector))
    }

    fn dimensions(&self) -> usize {
        32
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn dispose(&self) {}
}

fn no_progress(_: usize, _: usize, _: Option<&str>) {}

fn service(dir: &Path, embedder: Arc<dyn Embedder>) -> IndexingService {
    let store = VectorStore::open(&dir.join("vectors.redb")).unwrap();
    IndexingService::new(Arc::new(EmbeddingService::new(embedder)), store)
}

#[tokio::test]
async fn directory_sync_tracks_edits_and_deletions() {
    let data = tempfile::tempdir().unwrap();
    let notes_dir = tempfile::tempdir().unwrap();
    std::fs::write(notes_dir.path().join("a.md"), "# Alpha\nfirst").unwrap();
    std::fs::write(notes_dir.path().join("b.md"), "# Beta\nsecond").unwrap();
    std::fs::create_dir(notes_dir.path().join("sub")).unwrap();
    std::fs::write(notes_dir.path().join("sub/c.txt"), "third").unwrap();

    let indexing = service(data.path(), Arc::new(WordBuckets));
    let opts = IndexOptions::default();

    let notes = load_notes(notes_dir.path()).unwrap();
    let report = indexing.sync(&notes, &opts, no_progress).await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(indexing.store().stats().await.unwrap().total_count, 3);

    let record = indexing.store().get("sub/c.txt").await.unwrap().unwrap();
    assert_eq!(record.metadata.folder.as_deref(), Some("sub"));
    assert_eq!(record.embedding.len(), 32);

    std::fs::remove_file(notes_dir.path().join("b.md")).unwrap();
    let notes = load_notes(notes_dir.path()).unwrap();
    let report = indexing.sync(&notes, &opts, no_progress).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.index.processed, 0);
    assert!(!indexing.store().has("b.md").await.unwrap());

    let report = indexing.sync(&notes, &opts, no_progress).await.unwrap();
    assert_eq!(report, Default::default());
}

#[tokio::test]
async fn store_survives_reopen() {
    let data = tempfile::tempdir().unwrap();
    let notes: Vec<Note> = (0..4)
        .map(|i| Note {
            id: format!("{i}.md"),
            name: format!("Note {i}"),
            content: format!("body {i}"),
            tags: vec!["t".to_string()],
            folder: None,
            updated_at: 10,
            word_count: None,
        })
        .collect();

    {
        let indexing = service(data.path(), Arc::new(WordBuckets));
        indexing
            .index_all(notes.clone(), &IndexOptions::default(), no_progress)
            .await
            .unwrap();
    }

    let indexing = service(data.path(), Arc::new(WordBuckets));
    assert_eq!(indexing.store().stats().await.unwrap().total_count, 4);
    let again = indexing
        .index_all(notes, &IndexOptions::default(), no_progress)
        .await
        .unwrap();
    assert_eq!(again.total, 0);
}

#[tokio::test]
#[ignore = "requires model download"]
async fn neural_network_query_ranks_related_notes() {
    let data = tempfile::tempdir().unwrap();
    let embedder: Arc<dyn Embedder> =
        Arc::new(LocalEmbedder::new(data.path().join("models")).unwrap());
    let indexing = service(data.path(), embedder);

    let note = |id: &str, content: &str| Note {
        id: id.to_string(),
        name: String::new(),
        content: content.to_string(),
        tags: Vec::new(),
        folder: None,
        updated_at: 1,
        word_count: None,
    };
    let notes = vec![
        note("a", "machine learning and neural networks"),
        note("b", "deep learning neural network architectures"),
        note("c", "recipe for chocolate cake"),
    ];
    indexing
        .index_all(notes, &IndexOptions::default(), no_progress)
        .await
        .unwrap();

    let stats = indexing.store().stats().await.unwrap();
    assert_eq!(stats.dimensions, 384);

    let results = semantic_search(
        indexing.embeddings(),
        indexing.store(),
        "neural network research",
        &SearchOptions::default(),
    )
    .await
    .unwrap();

    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&"a"));
    assert!(ids.contains(&"b"));
    assert!(!ids.contains(&"c"));
    assert!(results.iter().all(|r| r.score >= 0.5 && r.score <= 1.0));
}
