//! Energy arrays: the ordered per-molecule results stored next to the
//! geometry file of a batch or store.

use std::fs;

use camino::Utf8Path;

use crate::error::FlavourError;
use crate::npy;
use crate::store::Store;

/// Concatenates `new` after `existing`. Values are copied bit for bit.
pub fn combine(existing: &[f64], new: &[f64]) -> Vec<f64> {
    let mut combined = Vec::with_capacity(existing.len() + new.len());
    combined.extend_from_slice(existing);
    combined.extend_from_slice(new);
    combined
}

pub fn load(path: &Utf8Path) -> Result<Vec<f64>, FlavourError> {
    let bytes = fs::read(path.as_std_path())
        .map_err(|err| FlavourError::Filesystem(format!("read {path}: {err}")))?;
    npy::decode_f64(&bytes).map_err(|err| FlavourError::NpyFormat {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Writes `values` to `path`, replacing any previous file in one step.
pub fn save(path: &Utf8Path, values: &[f64]) -> Result<(), FlavourError> {
    Store::write_bytes_atomic(path, &npy::encode_f64(values))
}

/// Checks an array against the molecule count recorded for it.
pub fn ensure_length(
    values: &[f64],
    num_molecules: u64,
    path: &Utf8Path,
) -> Result<(), FlavourError> {
    if values.len() as u64 != num_molecules {
        return Err(FlavourError::ArrayLength {
            expected: num_molecules,
            actual: values.len(),
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
