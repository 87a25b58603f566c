use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8Path;

use crate::config::ComputeSettings;
use crate::error::FlavourError;

/// Computes one energy per molecule of a batch, in geometry-file order.
/// Blocks until every molecule is done; any internal parallelism stays
/// behind this call.
pub trait EnergyCalculator {
    fn compute(
        &self,
        batch_dir: &Utf8Path,
        settings: &ComputeSettings,
        workers: NonZeroUsize,
    ) -> Result<Vec<f64>, FlavourError>;
}

/// Runs an external program as
/// `<program> <batch_dir> --settings <json file> --workers <n>`
/// and reads whitespace-separated energies from its stdout.
#[derive(Debug, Clone)]
pub struct CommandCalculator {
    name: String,
    program: Option<PathBuf>,
}

impl CommandCalculator {
    pub fn new(program: &str) -> Self {
        let resolved = if program.contains(std::path::MAIN_SEPARATOR) {
            let path = PathBuf::from(program);
            path.exists().then_some(path)
        } else {
            find_in_path(program)
        };
        Self {
            name: program.to_string(),
            program: resolved,
        }
    }

    fn require_program(&self) -> Result<&Path, FlavourError> {
        self.program
            .as_deref()
            .ok_or_else(|| FlavourError::Calculator(format!("program not found: {}", self.name)))
    }
}

impl EnergyCalculator for CommandCalculator {
    fn compute(
        &self,
        batch_dir: &Utf8Path,
        settings: &ComputeSettings,
        workers: NonZeroUsize,
    ) -> Result<Vec<f64>, FlavourError> {
        let program = self.require_program()?;
        let settings_file = tempfile::Builder::new()
            .prefix("flv-settings")
            .suffix(".json")
            .tempfile()
            .map_err(|err| FlavourError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(settings)
            .map_err(|err| FlavourError::Calculator(err.to_string()))?;
        std::fs::write(settings_file.path(), content)
            .map_err(|err| FlavourError::Filesystem(err.to_string()))?;

        tracing::info!(
            program = %program.display(),
            batch = %batch_dir,
            workers = workers.get(),
            "running energy calculation"
        );
        let output = Command::new(program)
            .arg(batch_dir.as_std_path())
            .arg("--settings")
            .arg(settings_file.path())
            .arg("--workers")
            .arg(workers.to_string())
            .output()
            .map_err(|err| FlavourError::Calculator(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", program.display(), output.status)
            } else {
                stderr
            };
            return Err(FlavourError::Calculator(message));
        }
        parse_energies(&String::from_utf8_lossy(&output.stdout))
    }
}

pub fn parse_energies(text: &str) -> Result<Vec<f64>, FlavourError> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| FlavourError::Calculator(format!("invalid energy value: {token}")))
        })
        .collect()
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
