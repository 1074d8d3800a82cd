//! Discovery of previous runs in an output directory.

use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// How a training run relates to what is already in its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeState {
    /// Start from the pretrained weights.
    Fresh,
    /// Continue from a saved checkpoint directory.
    Resume(PathBuf),
}

impl ResumeState {
    #[must_use]
    pub fn checkpoint(&self) -> Option<&Path> {
        match self {
            Self::Fresh => None,
            Self::Resume(path) => Some(path),
        }
    }
}

/// Step number encoded in a `checkpoint-<step>` directory name.
#[must_use]
pub fn checkpoint_step(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(CHECKPOINT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// All `checkpoint-<step>` sub-directories of `dir`, sorted by step.
pub fn list_checkpoints(dir: &Path) -> TrainingResult<Vec<(u64, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(step) = entry.file_name().to_str().and_then(checkpoint_step) else {
            continue;
        };
        found.push((step, path));
    }
    found.sort_by_key(|(step, _)| *step);
    Ok(found)
}

/// The checkpoint with the highest step inside `dir`, if any.
pub fn get_last_checkpoint(dir: &Path) -> TrainingResult<Option<PathBuf>> {
    Ok(list_checkpoints(dir)?.pop().map(|(_, path)| path))
}

/// Decide whether a run starts fresh, resumes, or must refuse to touch `output_dir`.
///
/// Entries listed in `derived` (the run's own cache and log directories) do
/// not make the directory count as non-empty. Paths are compared after
/// canonicalization, so `out/cache` and `./out/../out/cache` match.
pub fn detect_resume(
    output_dir: &Path,
    do_train: bool,
    overwrite_output_dir: bool,
    derived: &[&Path],
) -> TrainingResult<ResumeState> {
    if !output_dir.is_dir() || !do_train || overwrite_output_dir {
        return Ok(ResumeState::Fresh);
    }

    if let Some(last) = get_last_checkpoint(output_dir)? {
        tracing::info!(
            "Checkpoint detected, resuming training at {}. To avoid this behavior, change \
             the `--output_dir` or add `--overwrite_output_dir` to train from scratch.",
            last.display()
        );
        return Ok(ResumeState::Resume(last));
    }

    // Derived paths that do not exist cannot match an entry.
    let derived: Vec<PathBuf> =
        derived.iter().filter_map(|path| path.canonicalize().ok()).collect();
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        let path = path.canonicalize().unwrap_or(path);
        if !derived.contains(&path) {
            return Err(TrainingError::OutputDirNotEmpty { path: output_dir.to_path_buf() });
        }
    }

    Ok(ResumeState::Fresh)
}

/// Delete the oldest checkpoints so that at most `limit` remain.
pub fn rotate_checkpoints(dir: &Path, limit: usize) -> TrainingResult<Vec<PathBuf>> {
    let checkpoints = list_checkpoints(dir)?;
    let excess = checkpoints.len().saturating_sub(limit);
    let mut removed = Vec::with_capacity(excess);
    for (_, path) in checkpoints.into_iter().take(excess) {
        tracing::info!("Deleting older checkpoint {} due to save_total_limit", path.display());
        std::fs::remove_dir_all(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_step_parsing() {
        assert_eq!(checkpoint_step("checkpoint-500"), Some(500));
        assert_eq!(checkpoint_step("checkpoint-"), None);
        assert_eq!(checkpoint_step("checkpoint-5a"), None);
        assert_eq!(checkpoint_step("ckpt-5"), None);
    }

    #[test]
    fn test_missing_dir_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let state = detect_resume(&temp.path().join("nope"), true, false, &[]).unwrap();
        assert_eq!(state, ResumeState::Fresh);
    }

    #[test]
    fn test_empty_dir_starts_fresh() {
        let temp = TempDir::new().unwrap();
        assert_eq!(detect_resume(temp.path(), true, false, &[]).unwrap(), ResumeState::Fresh);
    }

    #[test]
    fn test_resumes_from_highest_checkpoint() {
        let temp = TempDir::new().unwrap();
        for step in [500, 1500, 1000] {
            std::fs::create_dir(temp.path().join(format!("checkpoint-{step}"))).unwrap();
        }
        std::fs::write(temp.path().join("checkpoint-9999"), "a file, not a dir").unwrap();

        let state = detect_resume(temp.path(), true, false, &[]).unwrap();
        assert_eq!(state, ResumeState::Resume(temp.path().join("checkpoint-1500")));
        assert_eq!(state.checkpoint(), Some(temp.path().join("checkpoint-1500").as_path()));
    }

    #[test]
    fn test_single_checkpoint_scenario() {
        let temp = TempDir::new().unwrap();
        let run = temp.path().join("run1");
        std::fs::create_dir_all(run.join("checkpoint-500")).unwrap();

        let state = detect_resume(&run, true, false, &[]).unwrap();
        assert_eq!(state, ResumeState::Resume(run.join("checkpoint-500")));
    }

    #[test]
    fn test_non_empty_dir_without_checkpoint_is_blocked() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "hello").unwrap();

        let err = detect_resume(temp.path(), true, false, &[]).unwrap_err();
        assert!(matches!(err, TrainingError::OutputDirNotEmpty { .. }));
        assert!(err.to_string().contains("--overwrite_output_dir"));
    }

    #[test]
    fn test_derived_dirs_do_not_block_a_fresh_run() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        std::fs::create_dir(&cache).unwrap();

        let state = detect_resume(temp.path(), true, false, &[cache.as_path()]).unwrap();
        assert_eq!(state, ResumeState::Fresh);
        assert!(detect_resume(temp.path(), true, false, &[]).is_err());
    }

    #[test]
    fn test_derived_dirs_match_regardless_of_spelling() {
        let temp = TempDir::new().unwrap();
        let run = temp.path().join("run");
        std::fs::create_dir_all(run.join("cache")).unwrap();

        let cache = temp.path().join("run").join("..").join("run").join("cache");
        let logs = run.join("runs");
        let state = detect_resume(&run, true, false, &[cache.as_path(), logs.as_path()]).unwrap();
        assert_eq!(state, ResumeState::Fresh);

        std::fs::write(run.join("notes.txt"), "hello").unwrap();
        assert!(detect_resume(&run, true, false, &[cache.as_path(), logs.as_path()]).is_err());
    }

    #[test]
    fn test_overwrite_skips_detection() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "hello").unwrap();
        std::fs::create_dir(temp.path().join("checkpoint-10")).unwrap();

        assert_eq!(detect_resume(temp.path(), true, true, &[]).unwrap(), ResumeState::Fresh);
    }

    #[test]
    fn test_no_train_skips_detection() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "hello").unwrap();

        assert_eq!(detect_resume(temp.path(), false, false, &[]).unwrap(), ResumeState::Fresh);
    }

    #[test]
    fn test_rotate_keeps_newest() {
        let temp = TempDir::new().unwrap();
        for step in [10, 20, 30, 40] {
            std::fs::create_dir(temp.path().join(format!("checkpoint-{step}"))).unwrap();
        }

        let removed = rotate_checkpoints(temp.path(), 2).unwrap();
        assert_eq!(removed.len(), 2);

        let left: Vec<u64> =
            list_checkpoints(temp.path()).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(left, vec![30, 40]);
    }
}
