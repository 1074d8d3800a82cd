//! Resolution of pretrained names to files on disk.
//!
//! A pretrained source is either a local directory, a direct path to a file, or
//! a name that was previously materialized under `<cache_dir>/<name>/`.

use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Locate `file_name` for the pretrained `source`.
pub fn resolve_file(source: &str, file_name: &str, cache_dir: &Path) -> TrainingResult<PathBuf> {
    let direct = Path::new(source);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    let candidates = [direct.join(file_name), cache_dir.join(source).join(file_name)];
    candidates.into_iter().find(|p| p.is_file()).ok_or_else(|| {
        TrainingError::pretrained(
            source,
            format!(
                "no {file_name} in a local directory or under cache dir {}",
                cache_dir.display()
            ),
        )
    })
}

/// Like [`resolve_file`], but a missing file is not an error.
#[must_use]
pub fn resolve_optional_file(source: &str, file_name: &str, cache_dir: &Path) -> Option<PathBuf> {
    let direct = Path::new(source);
    [direct.join(file_name), cache_dir.join(source).join(file_name)]
        .into_iter()
        .find(|p| p.is_file())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> TrainingResult<T> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::pretrained(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| TrainingError::pretrained(path, e))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
