//! Geometry and metadata files that accompany every energy array.
//!
//! Each batch or store directory holds exactly one file of each kind,
//! recognised by suffix. [`Sidecars::locate`] resolves both once so later
//! steps work on typed references instead of rescanning the directory.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::FlavourError;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SidecarKind {
    Geometry,
    Metadata,
}

impl SidecarKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            SidecarKind::Geometry => ".xyz",
            SidecarKind::Metadata => "info.json",
        }
    }
}

impl fmt::Display for SidecarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidecarKind::Geometry => write!(f, "geometry (*{})", self.suffix()),
            SidecarKind::Metadata => write!(f, "metadata (*{})", self.suffix()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecar {
    pub kind: SidecarKind,
    pub path: Utf8PathBuf,
}

impl Sidecar {
    /// Finds the single regular file in `dir` whose name ends with the
    /// kind's suffix.
    pub fn locate(dir: &Utf8Path, kind: SidecarKind) -> Result<Self, FlavourError> {
        let mut matches = Store::list_entries(dir)?
            .into_iter()
            .filter(|name| name.ends_with(kind.suffix()))
            .filter(|name| dir.join(name).as_std_path().is_file())
            .collect::<Vec<_>>();
        match matches.len() {
            0 => Err(FlavourError::MissingSidecar {
                kind,
                dir: dir.to_path_buf(),
            }),
            1 => {
                let name = matches.remove(0);
                Ok(Self {
                    kind,
                    path: dir.join(name),
                })
            }
            _ => Err(FlavourError::AmbiguousSidecar {
                kind,
                dir: dir.to_path_buf(),
                matches,
            }),
        }
    }

    pub fn file_name(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidecars {
    pub geometry: Sidecar,
    pub metadata: Sidecar,
}

impl Sidecars {
    pub fn locate(dir: &Utf8Path) -> Result<Self, FlavourError> {
        Ok(Self {
            geometry: Sidecar::locate(dir, SidecarKind::Geometry)?,
            metadata: Sidecar::locate(dir, SidecarKind::Metadata)?,
        })
    }
}

/// Appends the source geometry verbatim to the destination and removes the
/// source file.
pub fn append_geometry(source: &Sidecar, destination: &Sidecar) -> Result<(), FlavourError> {
    let content = fs::read(source.path.as_std_path())
        .map_err(|err| FlavourError::Filesystem(format!("read {}: {err}", source.path)))?;
    let mut file = OpenOptions::new()
        .append(true)
        .open(destination.path.as_std_path())
        .map_err(|err| FlavourError::Filesystem(format!("open {}: {err}", destination.path)))?;
    file.write_all(&content)
        .and_then(|_| file.sync_all())
        .map_err(|err| FlavourError::Filesystem(format!("append {}: {err}", destination.path)))?;
    tracing::debug!(
        source = %source.path,
        destination = %destination.path,
        bytes = content.len(),
        "appended geometry"
    );
    Store::remove_file(&source.path)
}

/// Metadata record kept beside every batch and store. Keys other than the
/// three known ones are carried through merges untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub functional: String,
    pub basisset: String,
    pub num_molecules: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BatchInfo {
    pub fn load(path: &Utf8Path) -> Result<Self, FlavourError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| FlavourError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| FlavourError::MetadataParse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), FlavourError> {
        Store::write_json_atomic(path, self)
    }
}

/// Fails when the source was computed with a different functional or basis
/// set than the destination.
pub fn check_consistency(
    source: &BatchInfo,
    source_path: &Utf8Path,
    destination: &BatchInfo,
    destination_path: &Utf8Path,
) -> Result<(), FlavourError> {
    let fields = [
        ("functional", &source.functional, &destination.functional),
        ("basisset", &source.basisset, &destination.basisset),
    ];
    for (field, source_value, destination_value) in fields {
        if source_value != destination_value {
            return Err(FlavourError::ConfigMismatch {
                field,
                source_value: source_value.clone(),
                destination_value: destination_value.clone(),
                source_path: source_path.to_path_buf(),
                destination_path: destination_path.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Adds the source molecule count into the destination record after the
/// consistency check, then removes the source record. The destination is
/// left untouched on mismatch.
pub fn merge_metadata(source: &Sidecar, destination: &Sidecar) -> Result<BatchInfo, FlavourError> {
    let incoming = BatchInfo::load(&source.path)?;
    let mut merged = BatchInfo::load(&destination.path)?;
    check_consistency(&incoming, &source.path, &merged, &destination.path)?;

    merged.num_molecules += incoming.num_molecules;
    merged.save(&destination.path)?;
    tracing::debug!(
        destination = %destination.path,
        added = incoming.num_molecules,
        total = merged.num_molecules,
        "merged metadata"
    );
    Store::remove_file(&source.path)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn utf8_temp() -> (tempfile::TempDir, Utf8PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, root)
    }

    #[test]
    fn locate_requires_exactly_one_match() {
        let (_temp, root) = utf8_temp();
        let err = Sidecar::locate(&root, SidecarKind::Geometry).unwrap_err();
        assert_matches!(err, FlavourError::MissingSidecar { kind: SidecarKind::Geometry, .. });

        fs::write(root.join("a.xyz").as_std_path(), "").unwrap();
        let found = Sidecar::locate(&root, SidecarKind::Geometry).unwrap();
        assert_eq!(found.file_name(), "a.xyz");

        fs::write(root.join("b.xyz").as_std_path(), "").unwrap();
        let err = Sidecar::locate(&root, SidecarKind::Geometry).unwrap_err();
        assert_matches!(err, FlavourError::AmbiguousSidecar { matches, .. } if matches.len() == 2);
    }

    #[test]
    fn metadata_suffix_matches_prefixed_names() {
        let (_temp, root) = utf8_temp();
        fs::write(root.join("flv1_info.json").as_std_path(), "{}").unwrap();
        fs::write(root.join("settings.json").as_std_path(), "{}").unwrap();
        let found = Sidecar::locate(&root, SidecarKind::Metadata).unwrap();
        assert_eq!(found.file_name(), "flv1_info.json");
    }

    #[test]
    fn unknown_keys_survive() {
        let info: BatchInfo = serde_json::from_str(
            r#"{"functional": "bmk", "basisset": "def2-SVP", "num_molecules": 2, "charge": 0}"#,
        )
        .unwrap();
        assert_eq!(info.extra.get("charge"), Some(&serde_json::json!(0)));
        let text = serde_json::to_string(&info).unwrap();
        assert!(text.contains("\"charge\":0"));
    }
}
