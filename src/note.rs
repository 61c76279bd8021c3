use serde::{Deserialize, Serialize};

/// A note as handed over by the note storage layer.
///
/// Only these fields are read; everything else about a note (attachments,
/// history, the relational cache) stays with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Stable identifier, unchanged across edits.
    pub id: String,
    /// Display title.
    pub name: String,
    /// Raw markdown body.
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folder: Option<String>,
    /// Last modification time in milliseconds since the Unix epoch.
    pub updated_at: u64,
    #[serde(default)]
    pub word_count: Option<usize>,
}

impl Note {
    /// Metadata copied into the vector store alongside the embedding.
    pub fn metadata(&self) -> NoteMetadata {
        NoteMetadata {
            title: self.name.clone(),
            tags: self.tags.clone(),
            folder: self.folder.clone(),
            updated_at: self.updated_at,
            word_count: self.word_count,
        }
    }
}

/// Per-record metadata kept next to each stored embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMetadata {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folder: Option<String>,
    pub updated_at: u64,
    #[serde(default)]
    pub word_count: Option<usize>,
}
