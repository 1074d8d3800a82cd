use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A labeled region of a page, e.g. a table or figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub label: String,
    pub bbox: [f32; 4],
}

/// One OCR'd document page as stored in a corpus JSONL file.
///
/// Boxes are `[x0, y0, x1, y1]` normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub words: Vec<String>,
    #[serde(default)]
    pub boxes: Vec<[f32; 4]>,
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Per-word entity tags; `"O"` marks words outside any entity.
    #[serde(default)]
    pub word_labels: Vec<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub answers: Vec<String>,
}

impl DocumentRecord {
    fn validate(&self) -> Result<(), String> {
        if !self.boxes.is_empty() && self.boxes.len() != self.words.len() {
            return Err(format!("{} words but {} boxes", self.words.len(), self.boxes.len()));
        }
        if !self.word_labels.is_empty() && self.word_labels.len() != self.words.len() {
            return Err(format!(
                "{} words but {} word labels",
                self.words.len(),
                self.word_labels.len()
            ));
        }
        Ok(())
    }

    /// Box of word `i`, or an empty box when the record has no layout.
    #[must_use]
    pub fn word_box(&self, i: usize) -> [f32; 4] {
        self.boxes.get(i).copied().unwrap_or([0.0; 4])
    }
}

/// Smallest box enclosing all `boxes`.
#[must_use]
pub fn union_box(boxes: impl IntoIterator<Item = [f32; 4]>) -> [f32; 4] {
    boxes
        .into_iter()
        .reduce(|a, b| [a[0].min(b[0]), a[1].min(b[1]), a[2].max(b[2]), a[3].max(b[3])])
        .unwrap_or([0.0; 4])
}

pub fn read_jsonl_records(path: &Path) -> TrainingResult<Vec<DocumentRecord>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TrainingError::Dataset(format!("failed to read corpus file {}: {e}", path.display()))
    })?;
    parse_jsonl_records(&contents, path)
}

/// Parse JSONL `contents` already read from `path`; `path` only labels errors.
pub fn parse_jsonl_records(contents: &str, path: &Path) -> TrainingResult<Vec<DocumentRecord>> {
    let mut records = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: DocumentRecord = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!(
                "{}: failed to parse line {}: {}",
                path.display(),
                idx + 1,
                e
            ))
        })?;
        record.validate().map_err(|e| {
            TrainingError::Dataset(format!("{}: line {}: {}", path.display(), idx + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}
