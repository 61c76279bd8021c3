use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};

use notevec::{NoteMetadata, VectorStore};

fn notevec_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_notevec") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("notevec");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}

fn run(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(notevec_bin().unwrap())
        .args(args)
        .env("NOTEVEC_DATA_DIR", data_dir)
        .env_remove("NOTEVEC_MODEL")
        .env("NOTEVEC_LOG", "off")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn metadata(title: &str) -> NoteMetadata {
    NoteMetadata {
        title: title.to_string(),
        tags: Vec::new(),
        folder: None,
        updated_at: 1,
        word_count: None,
    }
}

async fn seed(data_dir: &Path) {
    let store = VectorStore::open(&data_dir.join("vectors.redb")).unwrap();
    store
        .put("a.md", vec![1.0, 0.0, 0.0], metadata("A"))
        .await
        .unwrap();
    store
        .put("b.md", vec![0.9, 0.1, 0.0], metadata("B"))
        .await
        .unwrap();
    store
        .put("c.md", vec![0.0, 0.0, 1.0], metadata("C"))
        .await
        .unwrap();
}

#[test]
fn status_on_empty_data_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run(tmp.path(), &["status", "--json"]);
    assert!(output.status.success());

    let value: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(value["totalCount"], 0);
    assert_eq!(value["dimensions"], 0);
    assert_eq!(value["model"], "all-MiniLM-L6-v2");
    assert_eq!(value["dataDirSource"], "env");
    assert!(tmp.path().join("vectors.redb").exists());
}

#[test]
fn data_dir_flag_wins_over_environment() {
    let from_env = tempfile::tempdir().unwrap();
    let from_flag = tempfile::tempdir().unwrap();
    let flag = from_flag.path().to_str().unwrap();

    let output =
        run(from_env.path(), &["--data-dir", flag, "status", "--json"]);
    assert!(output.status.success());

    let value: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(value["dataDirSource"], "flag");
    assert_eq!(value["dataDir"], flag);
    assert!(from_flag.path().join("vectors.redb").exists());
    assert!(!from_env.path().join("vectors.redb").exists());
}

#[tokio::test]
async fn status_reports_stored_notes() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path()).await;

    let output = run(tmp.path(), &["status", "--json"]);
    let value: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(value["totalCount"], 3);
    assert_eq!(value["dimensions"], 3);
    assert!(value["lastUpdated"].is_u64());
}

#[tokio::test]
async fn related_lists_neighbours_without_the_note() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path()).await;

    let output = run(tmp.path(), &["related", "a.md", "--json"]);
    assert!(output.status.success());

    let value: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).unwrap();
    let ids: Vec<_> = value["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["b.md"]);
}

#[test]
fn related_to_unknown_note_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run(tmp.path(), &["related", "missing.md"]);
    assert!(!output.status.success());
}

#[tokio::test]
async fn remove_and_clear() {
    let tmp = tempfile::tempdir().unwrap();
    seed(tmp.path()).await;

    let removed = run(tmp.path(), &["remove", "a.md"]);
    assert!(removed.status.success());
    assert!(stdout(&removed).contains("Removed 'a.md'"));

    let again = run(tmp.path(), &["remove", "a.md"]);
    assert!(again.status.success());
    assert!(stdout(&again).contains("No embedding stored"));

    let cleared = run(tmp.path(), &["clear"]);
    assert!(cleared.status.success());

    let status = run(tmp.path(), &["status", "--json"]);
    let value: serde_json::Value =
        serde_json::from_str(stdout(&status).trim()).unwrap();
    assert_eq!(value["totalCount"], 0);
}

#[test]
fn unknown_model_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let output = run(tmp.path(), &["search", "hello", "--model", "nope"]);
    assert!(!output.status.success());
}
