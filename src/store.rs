use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::BatchName;
use crate::error::FlavourError;

pub const STATE_FILE: &str = ".finalize_state.json";
pub const PENDING_FILE: &str = ".finalize_pending.json";

/// Staging and results roots, and the paths derived from them.
#[derive(Debug, Clone)]
pub struct Store {
    staging_root: Utf8PathBuf,
    results_root: Utf8PathBuf,
}

impl Store {
    pub fn new(staging_root: Utf8PathBuf, results_root: Utf8PathBuf) -> Self {
        Self {
            staging_root,
            results_root,
        }
    }

    pub fn staging_root(&self) -> &Utf8Path {
        &self.staging_root
    }

    pub fn results_root(&self) -> &Utf8Path {
        &self.results_root
    }

    pub fn batch_dir(&self, batch: &BatchName) -> Utf8PathBuf {
        self.staging_root.join(batch.as_str())
    }

    pub fn store_dir(&self, batch: &BatchName) -> Utf8PathBuf {
        self.results_root.join(batch.as_str())
    }

    /// Scratch area for a merge: `store/` is the staged result,
    /// `incoming/` a copy of the batch being consumed.
    pub fn work_dir(&self, batch: &BatchName) -> Utf8PathBuf {
        self.results_root.join(format!(".{}.work", batch.as_str()))
    }

    /// Where the old store sits while the staged one is swapped in.
    pub fn previous_dir(&self, batch: &BatchName) -> Utf8PathBuf {
        self.results_root.join(format!(".{}.previous", batch.as_str()))
    }

    pub fn ensure_results_root(&self) -> Result<(), FlavourError> {
        fs::create_dir_all(self.results_root.as_std_path())
            .map_err(|err| FlavourError::Filesystem(err.to_string()))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), FlavourError> {
        let parent = path
            .parent()
            .ok_or_else(|| FlavourError::Filesystem(format!("invalid destination path {path}")))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".flv-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| FlavourError::Filesystem(format!("write {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("persist {path}: {err}")))?;
        Ok(())
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), FlavourError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, FlavourError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("read {path}: {err}")))?;
        let value = serde_json::from_str(&content).map_err(|err| FlavourError::MetadataParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Some(value))
    }

    pub fn copy_dir_recursive(source: &Utf8Path, dest: &Utf8Path) -> Result<(), FlavourError> {
        fs::create_dir_all(dest.as_std_path())
            .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
        for entry in walk_dir(source.as_std_path())? {
            let relative = entry
                .strip_prefix(source.as_std_path())
                .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
            let target = dest.as_std_path().join(relative);
            if entry.is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
                }
                fs::copy(&entry, &target).map_err(|err| {
                    FlavourError::Filesystem(format!("copy {}: {err}", entry.display()))
                })?;
            }
        }
        Ok(())
    }

    /// Renames `from` to `to`, failing instead of replacing an existing target.
    pub fn rename_no_clobber(from: &Utf8Path, to: &Utf8Path) -> Result<(), FlavourError> {
        if to.as_std_path().exists() {
            return Err(FlavourError::FilesystemConflict(to.to_path_buf()));
        }
        fs::rename(from.as_std_path(), to.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("rename {from} -> {to}: {err}")))
    }

    pub fn list_entries(dir: &Utf8Path) -> Result<Vec<String>, FlavourError> {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("read {dir}: {err}")))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FlavourError::Filesystem(err.to_string()))?;
            let name = entry.file_name().into_string().map_err(|raw| {
                FlavourError::Filesystem(format!("non-utf8 entry {raw:?} in {dir}"))
            })?;
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Removes a directory that is expected to be empty. Leftovers are reported.
    pub fn remove_empty_dir(dir: &Utf8Path) -> Result<(), FlavourError> {
        let remaining = Self::list_entries(dir)?;
        if !remaining.is_empty() {
            return Err(FlavourError::PartialRelocation {
                dir: dir.to_path_buf(),
                remaining,
            });
        }
        fs::remove_dir(dir.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("remove {dir}: {err}")))
    }

    pub fn remove_dir_all(dir: &Utf8Path) -> Result<(), FlavourError> {
        if dir.as_std_path().exists() {
            fs::remove_dir_all(dir.as_std_path())
                .map_err(|err| FlavourError::Filesystem(format!("remove {dir}: {err}")))?;
        }
        Ok(())
    }

    pub fn remove_file(path: &Utf8Path) -> Result<(), FlavourError> {
        fs::remove_file(path.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("remove {path}: {err}")))
    }
}

/// Bookkeeping kept inside every finalized store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub generation: u64,
    pub num_molecules: u64,
    pub finalized_at: String,
}

impl StoreState {
    pub fn new(generation: u64, num_molecules: u64) -> Self {
        Self {
            generation,
            num_molecules,
            finalized_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Stores written before state tracking existed count as generation 0.
    pub fn load(store_dir: &Utf8Path) -> Result<Option<Self>, FlavourError> {
        Store::read_json(&store_dir.join(STATE_FILE))
    }

    pub fn generation_of(store_dir: &Utf8Path) -> Result<u64, FlavourError> {
        Ok(Self::load(store_dir)?.map(|state| state.generation).unwrap_or(0))
    }

    pub fn save(&self, store_dir: &Utf8Path) -> Result<(), FlavourError> {
        Store::write_json_atomic(&store_dir.join(STATE_FILE), self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Create,
    Merge,
}

impl PendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingAction::Create => "create",
            PendingAction::Merge => "merge",
        }
    }
}

/// Written into a batch before it is consumed, naming the store generation
/// the batch will produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMarker {
    pub action: PendingAction,
    pub generation: u64,
}

impl PendingMarker {
    pub fn load(batch_dir: &Utf8Path) -> Result<Option<Self>, FlavourError> {
        Store::read_json(&batch_dir.join(PENDING_FILE))
    }

    pub fn save(&self, batch_dir: &Utf8Path) -> Result<(), FlavourError> {
        Store::write_json_atomic(&batch_dir.join(PENDING_FILE), self)
    }

    pub fn clear(dir: &Utf8Path) -> Result<(), FlavourError> {
        let path = dir.join(PENDING_FILE);
        if path.as_std_path().exists() {
            Store::remove_file(&path)?;
        }
        Ok(())
    }
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, FlavourError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| FlavourError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| FlavourError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
