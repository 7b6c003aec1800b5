//! Space catalog seed loading.
//!
//! The catalog is YAML, either from `SEED_FILE` or the embedded default.
//! Records are validated here so the registry can assume well-formed input.

use std::collections::HashSet;
use std::path::Path;

use wire::Space;

const DEFAULT_SEED: &str = include_str!("../seed/spaces.yaml");

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse seed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("duplicate space id {0}")]
    DuplicateId(i64),
    #[error("space {0} violates 0 <= availableSeats <= totalSeats")]
    Inconsistent(i64),
}

/// Load and validate the catalog from `path`, or the embedded default when `None`.
///
/// # Errors
///
/// Returns [`SeedError`] for unreadable files, malformed YAML, duplicate
/// IDs or out-of-bounds seat counts.
pub fn load_spaces(path: Option<&Path>) -> Result<Vec<Space>, SeedError> {
    match path {
        Some(path) => parse_spaces(&std::fs::read_to_string(path)?),
        None => default_spaces(),
    }
}

/// The embedded default catalog.
///
/// # Errors
///
/// Same as [`parse_spaces`].
pub fn default_spaces() -> Result<Vec<Space>, SeedError> {
    parse_spaces(DEFAULT_SEED)
}

/// Parse and validate catalog YAML.
///
/// # Errors
///
/// See [`load_spaces`].
pub fn parse_spaces(yaml: &str) -> Result<Vec<Space>, SeedError> {
    let spaces: Vec<Space> = serde_yaml::from_str(yaml)?;
    let mut seen = HashSet::new();
    for space in &spaces {
        if !seen.insert(space.id) {
            return Err(SeedError::DuplicateId(space.id));
        }
        if !space.is_consistent() {
            return Err(SeedError::Inconsistent(space.id));
        }
    }
    Ok(spaces)
}

#[cfg(test)]
#[path = "seed_test.rs"]
mod tests;
