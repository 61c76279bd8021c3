//! Location of the vector database and the model cache.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "NOTEVEC_DATA_DIR";

const XDG_PREFIX: &str = "notevec";
const VECTORS_FILE: &str = "vectors.redb";
const MODELS_DIR: &str = "models";

/// Which setting picked the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDirSource {
    /// `--data-dir`
    Flag,
    /// `NOTEVEC_DATA_DIR`
    Env,
    /// `$XDG_DATA_HOME/notevec`
    Xdg,
}

impl DataDirSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataDirSource::Flag => "flag",
            DataDirSource::Env => "env",
            DataDirSource::Xdg => "xdg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: DataDirSource,
}

impl DataDir {
    /// `explicit` wins, then a non-empty `NOTEVEC_DATA_DIR`, then the XDG
    /// data home. The directory is created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(DATA_DIR_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let (root, source) = match (explicit, from_env) {
            (Some(path), _) => (path.to_path_buf(), DataDirSource::Flag),
            (None, Some(path)) => (path, DataDirSource::Env),
            (None, None) => (xdg_data_home()?, DataDirSource::Xdg),
        };

        if let Err(e) = std::fs::create_dir_all(&root) {
            debug!(root = %root.display(), error = %e, "mkdir failed");
            return Err(Error::DataDir(root));
        }
        debug!(root = %root.display(), source = source.as_str(), "data dir");

        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> DataDirSource {
        self.source
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join(VECTORS_FILE)
    }

    /// Downloaded embedding models. Created by the embedder on first load.
    pub fn models_dir(&self) -> PathBuf {
        self.root.join(MODELS_DIR)
    }
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(XDG_PREFIX)
        .get_data_home()
        .ok_or_else(|| {
            Error::Config(
                "no XDG data home; pass --data-dir or set NOTEVEC_DATA_DIR"
                    .into(),
            )
        })
}
