use super::DocFeatures;
use super::corpus::{Corpus, Split, Task};
use super::encode::EncodeLimits;
use crate::error::{TrainingError, TrainingResult};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FEATURES_DIR: &str = "features";

/// Identifies one encoded view of a corpus file.
#[derive(Debug, Clone)]
pub struct CacheKey {
    pub corpus: Corpus,
    pub task: Task,
    pub split: Split,
    pub limits: EncodeLimits,
    pub seed: u64,
    pub vocab_size: usize,
}

impl CacheKey {
    /// SHA-256 over the source bytes and everything that changes the encoding.
    #[must_use]
    pub fn digest(&self, source: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update(b"\n");
        hasher.update(
            format!(
                "{}|{}|{}|{}|{}|{}|{}",
                self.corpus,
                self.task,
                self.split,
                self.limits.max_seq_length,
                self.limits.max_seq_length_decoder,
                self.seed,
                self.vocab_size
            )
            .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }

    #[must_use]
    pub fn path(&self, cache_dir: &Path, digest: &str) -> PathBuf {
        cache_dir
            .join(FEATURES_DIR)
            .join(format!("{}-{}-{}-{}.jsonl", self.corpus, self.split, self.task, &digest[..16]))
    }
}

pub fn load_features(path: &Path) -> TrainingResult<Option<Vec<DocFeatures>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let mut features = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let feature = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!(
                "corrupt feature cache {} at line {}: {e}",
                path.display(),
                idx + 1
            ))
        })?;
        features.push(feature);
    }
    Ok(Some(features))
}

/// Write `features` to `path`, going through a temp file so readers never see a partial cache.
pub fn store_features(path: &Path, features: &[DocFeatures]) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
        for feature in features {
            serde_json::to_writer(&mut out, feature)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> CacheKey {
        CacheKey {
            corpus: Corpus::IitCdip,
            task: Task::LayoutModeling,
            split: Split::Train,
            limits: EncodeLimits { max_seq_length: 16, max_seq_length_decoder: 8 },
            seed: 42,
            vocab_size: 30,
        }
    }

    #[test]
    fn test_digest_depends_on_source_and_settings() {
        let base = key().digest(b"abc");
        assert_eq!(base, key().digest(b"abc"));
        assert_ne!(base, key().digest(b"abd"));

        let mut other = key();
        other.seed = 43;
        assert_ne!(base, other.digest(b"abc"));
    }

    #[test]
    fn test_store_then_load() {
        let temp = TempDir::new().unwrap();
        let k = key();
        let path = k.path(temp.path(), &k.digest(b"x"));
        assert!(path.starts_with(temp.path().join(FEATURES_DIR)));
        assert!(load_features(&path).unwrap().is_none());

        let features = vec![DocFeatures {
            input_ids: vec![4, 5],
            bbox: vec![[0.0; 4]; 2],
            labels: vec![1],
            image: None,
        }];
        store_features(&path, &features).unwrap();
        assert_eq!(load_features(&path).unwrap(), Some(features));
    }
}
