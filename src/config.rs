use std::fs;
use std::num::NonZeroUsize;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::FlavourError;

pub const DEFAULT_CALCULATOR: &str = "parallel-qm";

/// Settings handed to the energy calculator for every batch of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSettings {
    pub qm_method: String,
    pub delete_calculation_dirs: bool,
    pub copy_mos: bool,
    pub dispersion: bool,
    pub turbomole_method: String,
    pub turbomole_basis: String,
    pub turbomole_functional: String,
    pub partial_chrg: bool,
    pub unp_el: u32,
    pub h20: bool,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            qm_method: "dft".to_string(),
            delete_calculation_dirs: false,
            copy_mos: false,
            dispersion: true,
            turbomole_method: "ridft".to_string(),
            turbomole_basis: "6-311++G**".to_string(),
            turbomole_functional: "bmk".to_string(),
            partial_chrg: false,
            unp_el: 1,
            h20: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub staging_root: Utf8PathBuf,
    pub results_root: Utf8PathBuf,
    pub workers: NonZeroUsize,
    pub calculator: String,
    pub settings: ComputeSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Built-in settings, overridden key by key from a JSON file when given.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ComputeSettings, FlavourError> {
        let Some(path) = path else {
            return Ok(ComputeSettings::default());
        };
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| FlavourError::ConfigRead(path.to_path_buf()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<ComputeSettings, FlavourError> {
        serde_json::from_str(content).map_err(|err| FlavourError::ConfigParse(err.to_string()))
    }
}

pub fn parse_workers(value: &str) -> Result<NonZeroUsize, FlavourError> {
    value
        .trim()
        .parse::<NonZeroUsize>()
        .map_err(|_| FlavourError::InvalidWorkers(value.to_string()))
}
