use std::fmt::Write as _;

use serde::Serialize;

use crate::{
    embedding::EmbeddingService,
    error::{Error, Result},
    markdown::hashtag,
    similarity::SimilarityResult,
    vector_store::{SearchOptions, VectorStore},
};

/// Embed `query` and return the closest stored notes.
pub async fn semantic_search(
    embeddings: &EmbeddingService,
    store: &VectorStore,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SimilarityResult>> {
    let query_embedding = embeddings.embed_query(query).await?;
    store.find_similar(&query_embedding, options).await
}

/// Notes closest to the stored note `id`, never including `id` itself.
pub async fn related_notes(
    store: &VectorStore,
    id: &str,
    options: &SearchOptions,
) -> Result<Vec<SimilarityResult>> {
    let record = store.get(id).await?.ok_or_else(|| Error::NotFound {
        kind: "note",
        name: id.to_string(),
    })?;

    let mut options = options.clone();
    if !options.exclude_ids.iter().any(|excluded| excluded == id) {
        options.exclude_ids.push(id.to_string());
    }
    store.find_similar(&record.embedding, &options).await
}

/// Results as ranked terminal lines.
pub fn format_human(results: &[SimilarityResult]) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for (rank, r) in results.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. [{:.3}] {}", rank + 1, r.score, r.id);
        if !r.metadata.title.is_empty() {
            let _ = writeln!(out, "     {}", r.metadata.title);
        }
        if !r.metadata.tags.is_empty() {
            let tags: Vec<_> =
                r.metadata.tags.iter().map(|t| hashtag(t)).collect();
            let _ = writeln!(out, "     {}", tags.join(" "));
        }
    }
    let _ = writeln!(out, "\n{} result(s)", results.len());
    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [SimilarityResult],
}

/// Results as a single JSON object.
pub fn format_json(query: &str, results: &[SimilarityResult]) -> Result<String> {
    Ok(serde_json::to_string(&JsonOutput {
        query,
        result_count: results.len(),
        results,
    })?)
}
