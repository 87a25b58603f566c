use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlavourError;

/// Directory prefix that marks a staging entry as a flavour batch.
pub const BATCH_PREFIX: &str = "FLV_";

const KEY_OFFSET: usize = BATCH_PREFIX.len();

/// Flavour identifier: the single character that follows [`BATCH_PREFIX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryKey(char);

impl CategoryKey {
    pub fn as_char(&self) -> char {
        self.0
    }

    pub fn array_file_name(&self) -> String {
        format!("final_energies_{}.npy", self.0)
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a batch directory under the staging root. The finalized store
/// for the batch lives under the same name in the results root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchName(String);

impl BatchName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> CategoryKey {
        // Validated in from_str.
        let ch = self.0[KEY_OFFSET..].chars().next().unwrap_or_default();
        CategoryKey(ch)
    }

    pub fn matches_prefix(name: &str) -> bool {
        name.starts_with(BATCH_PREFIX)
    }
}

impl fmt::Display for BatchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchName {
    type Err = FlavourError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let has_key = value
            .strip_prefix(BATCH_PREFIX)
            .and_then(|rest| rest.chars().next())
            .map(|ch| !ch.is_whitespace() && ch != '/' && ch != '\\' && ch != '.')
            .unwrap_or(false);
        let is_plain = !value.contains(['/', '\\']);
        if !has_key || !is_plain {
            return Err(FlavourError::InvalidBatchName(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn key_is_char_after_prefix() {
        let name: BatchName = "FLV_3_extra".parse().unwrap();
        assert_eq!(name.category().as_char(), '3');
        assert_eq!(name.category().array_file_name(), "final_energies_3.npy");
    }

    #[test]
    fn rejects_names_without_key() {
        let err = "FLV_".parse::<BatchName>().unwrap_err();
        assert_matches!(err, FlavourError::InvalidBatchName(_));
        let err = "other_dir".parse::<BatchName>().unwrap_err();
        assert_matches!(err, FlavourError::InvalidBatchName(_));
    }
}
