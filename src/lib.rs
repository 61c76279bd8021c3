//! notevec - local semantic search over personal notes.
//!
//! Notes are embedded on the machine with a small sentence-embedding model
//! ([fastembed](https://github.com/Anush008/fastembed-rs)), stored in a
//! [redb](https://github.com/cberner/redb) database and searched by cosine
//! similarity. No network access is needed once the model is cached.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use notevec::{
//!     DataDir, EmbeddingService, IndexOptions, IndexingService,
//!     LocalEmbedder, SearchOptions, VectorStore,
//! };
//!
//! # async fn run() -> notevec::Result<()> {
//! let data_dir = DataDir::resolve(None)?;
//! let store = VectorStore::open(&data_dir.vectors_db())?;
//! let embedder = Arc::new(LocalEmbedder::new(data_dir.models_dir())?);
//! let embeddings = Arc::new(EmbeddingService::new(embedder));
//! let indexing = IndexingService::new(embeddings.clone(), store.clone());
//!
//! let notes = notevec::notes::load_notes(std::path::Path::new("notes"))?;
//! indexing
//!     .index_all(notes, &IndexOptions::default(), |done, total, _| {
//!         println!("{done}/{total}");
//!     })
//!     .await?;
//!
//! let results = notevec::search::semantic_search(
//!     &embeddings,
//!     &store,
//!     "neural network research",
//!     &SearchOptions::default(),
//! )
//! .await?;
//! for r in &results {
//!     println!("{} ({:.3})", r.id, r.score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod data_dir;
pub mod embedder;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod markdown;
pub mod note;
pub mod notes;
pub mod search;
pub mod similarity;
pub mod vector_store;

#[cfg(test)]
mod test_support;

pub use data_dir::DataDir;
pub use embedder::{Embedder, LocalEmbedder};
pub use embedding::EmbeddingService;
pub use error::{Error, Result};
pub use indexing::{IndexOptions, IndexingService, IndexingStatus};
pub use note::{Note, NoteMetadata};
pub use similarity::SimilarityResult;
pub use vector_store::{SearchOptions, VectorStore};
