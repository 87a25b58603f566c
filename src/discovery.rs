//! Lists pending flavour batches under a staging root.

use std::fs;

use camino::Utf8Path;

use crate::domain::BatchName;
use crate::error::FlavourError;

/// Returns the batch directories directly under `staging_root`, sorted
/// ascending by name. Entries without the batch prefix and plain files are
/// skipped, as are prefixed directories without a usable key. An empty
/// root yields an empty list.
pub fn discover_batches(staging_root: &Utf8Path) -> Result<Vec<BatchName>, FlavourError> {
    let entries = fs::read_dir(staging_root.as_std_path()).map_err(|err| {
        FlavourError::Filesystem(format!("read staging root {staging_root}: {err}"))
    })?;

    let mut batches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| FlavourError::Filesystem(err.to_string()))?;
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = ?entry.path(), "skipping non-utf8 staging entry");
            continue;
        };
        if !BatchName::matches_prefix(&name) || !entry.path().is_dir() {
            continue;
        }
        match name.parse::<BatchName>() {
            Ok(batch) => batches.push(batch),
            Err(err) => tracing::warn!(name = %name, %err, "skipping malformed batch directory"),
        }
    }
    batches.sort();
    Ok(batches)
}
