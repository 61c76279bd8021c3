//! Loading a directory of plain-text notes.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    note::Note,
};

const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)#([\p{L}\p{N}_][\p{L}\p{N}_/-]*)").expect("valid regex")
});

#[derive(Debug, Clone)]
struct NoteFile {
    relative_path: PathBuf,
    absolute_path: PathBuf,
}

/// Read every `.md` and `.txt` file under `root` into a [`Note`].
///
/// Hidden files and directories are skipped. Files that cannot be read
/// as UTF-8 are logged and left out. Notes come back sorted by id.
pub fn load_notes(root: &Path) -> Result<Vec<Note>> {
    let files = discover(root)?;
    debug!(count = files.len(), root = %root.display(), "discovered notes");

    let notes = files
        .par_iter()
        .filter_map(|file| match read_note(file) {
            Ok(note) => Some(note),
            Err(e) => {
                warn!(
                    path = %file.absolute_path.display(),
                    error = %e,
                    "skipping unreadable note"
                );
                None
            }
        })
        .collect();
    Ok(notes)
}

/// [`load_notes`] on the blocking pool.
pub async fn scan_notes(root: PathBuf) -> Result<Vec<Note>> {
    tokio::task::spawn_blocking(move || load_notes(&root))
        .await
        .map_err(scan_failed)?
}

/// A scan that panicked or was cancelled is a filesystem failure, not a
/// store one.
fn scan_failed(error: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(error))
}

fn discover(root: &Path) -> Result<Vec<NoteFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<NoteFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            // Only file symlinks are followed, which rules out cycles.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_file() && is_supported(&resolved) {
                results.push(note_file(root, &path, resolved));
            }
        } else if file_type.is_file() && is_supported(&path) {
            let resolved = path.canonicalize()?;
            results.push(note_file(root, &path, resolved));
        }
    }
    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

fn note_file(root: &Path, path: &Path, absolute_path: PathBuf) -> NoteFile {
    NoteFile {
        relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
        absolute_path,
    }
}

fn read_note(file: &NoteFile) -> Result<Note> {
    let content = std::fs::read_to_string(&file.absolute_path)?;
    let updated_at = std::fs::metadata(&file.absolute_path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let folder = file
        .relative_path
        .parent()
        .map(path_id)
        .filter(|folder| !folder.is_empty());

    Ok(Note {
        id: path_id(&file.relative_path),
        name: extract_title(&content, &file.relative_path),
        tags: extract_tags(&content),
        folder,
        updated_at,
        word_count: Some(content.split_whitespace().count()),
        content,
    })
}

/// Relative path with `/` separators on every platform.
fn path_id(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// First `# ` heading, else the file stem.
fn extract_title(content: &str, file_path: &Path) -> String {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("# "))
        .map(str::trim)
        .find(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string()
        })
}

/// Inline `#tags`, deduplicated, in order of first appearance.
fn extract_tags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for caps in INLINE_TAG.captures_iter(line) {
            let tag = &caps[1];
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_md_and_txt_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello\nbody").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "plain").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let notes = load_notes(tmp.path()).unwrap();
        let ids: Vec<_> = notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["note.md", "readme.txt"]);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".obsidian");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("workspace.md"), "state").unwrap();
        std::fs::write(tmp.path().join(".draft.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let notes = load_notes(tmp.path()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "visible.md");
    }

    #[test]
    fn nested_note_gets_folder_and_path_id() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("projects").join("rust");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("ownership.md"), "borrow checker").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let notes = load_notes(tmp.path()).unwrap();
        assert_eq!(notes[0].id, "projects/rust/ownership.md");
        assert_eq!(notes[0].folder.as_deref(), Some("projects/rust"));
        assert_eq!(notes[1].id, "top.md");
        assert_eq!(notes[1].folder, None);
    }

    #[test]
    fn fields_are_filled_from_content() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("ml.md"),
            "# Machine Learning\n\nNotes on #ai and #ml/deep topics. #ai again",
        )
        .unwrap();

        let notes = load_notes(tmp.path()).unwrap();
        let note = &notes[0];
        assert_eq!(note.name, "Machine Learning");
        assert_eq!(note.tags, vec!["ai", "ml/deep"]);
        assert_eq!(note.word_count, Some(11));
        assert!(note.updated_at > 0);
    }

    #[test]
    fn title_falls_back_to_stem() {
        assert_eq!(
            extract_title("no heading here", Path::new("dir/my-note.md")),
            "my-note"
        );
        assert_eq!(
            extract_title("## Sub\n# Real Title", Path::new("x.md")),
            "Real Title"
        );
    }

    #[test]
    fn headings_and_fenced_code_are_not_tags() {
        let content = "# Title\n```sh\n#comment\n```\ncolor: #fff and #real";
        assert_eq!(extract_tags(content), vec!["fff", "real"]);
        assert_eq!(extract_tags("issue#42 is not a tag"), Vec::<String>::new());
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_notes(tmp.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_runs_off_the_async_thread() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "alpha").unwrap();

        let notes = scan_notes(tmp.path().to_path_buf()).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "a.md");
    }

    #[tokio::test]
    async fn failed_scan_task_is_not_a_store_error() {
        let join_error =
            tokio::task::spawn_blocking(|| -> usize { panic!("walker") })
                .await
                .unwrap_err();

        let err = scan_failed(join_error);
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_store_io());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_notes(&tmp.path().join("nope")).is_err());
    }
}
