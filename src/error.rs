use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::sidecar::SidecarKind;

#[derive(Debug, Error, Diagnostic)]
pub enum FlavourError {
    #[error("invalid batch directory name: {0}")]
    InvalidBatchName(String),

    #[error("invalid worker count: {0}")]
    InvalidWorkers(String),

    #[error("category key '{key}' is claimed by both {first} and {second}")]
    #[diagnostic(help("each flavour has exactly one results store; rename the batch to match it"))]
    DuplicateCategory {
        key: String,
        first: String,
        second: String,
    },

    #[error("no {kind} file found in {dir}")]
    #[diagnostic(help("every batch and store directory needs exactly one {kind} file"))]
    MissingSidecar { kind: SidecarKind, dir: Utf8PathBuf },

    #[error("multiple {kind} files found in {dir}: {matches:?}")]
    AmbiguousSidecar {
        kind: SidecarKind,
        dir: Utf8PathBuf,
        matches: Vec<String>,
    },

    #[error(
        "{field} mismatch: source {source_path} has '{source_value}', destination {destination_path} has '{destination_value}'"
    )]
    #[diagnostic(help("a batch can only be merged into a store computed with the same settings"))]
    ConfigMismatch {
        field: &'static str,
        source_value: String,
        destination_value: String,
        source_path: Utf8PathBuf,
        destination_path: Utf8PathBuf,
    },

    #[error("refusing to overwrite existing path: {0}")]
    FilesystemConflict(Utf8PathBuf),

    #[error("directory {dir} is not empty after relocation: {remaining:?}")]
    PartialRelocation {
        dir: Utf8PathBuf,
        remaining: Vec<String>,
    },

    #[error("array length {actual} does not match num_molecules {expected} for {path}")]
    ArrayLength {
        expected: u64,
        actual: usize,
        path: Utf8PathBuf,
    },

    #[error("invalid npy file {path}: {message}")]
    NpyFormat { path: Utf8PathBuf, message: String },

    #[error("failed to parse metadata record {path}: {message}")]
    MetadataParse { path: Utf8PathBuf, message: String },

    #[error("energy calculation failed: {0}")]
    Calculator(String),

    #[error("failed to read settings file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse settings file: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
