//! The trainer seam and the state it persists.

pub mod local;

pub use local::{LocalTrainer, WorldInfo};

use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const EVAL_RESULTS_FILE: &str = "eval_results.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Running,
    Finished,
    Failed(String),
}

/// Metrics in the order they were produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalMetrics(Vec<(String, f64)>);

impl EvalMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.0.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` into `self`, keeping first-seen order.
    pub fn extend(&mut self, other: &Self) {
        for (k, v) in other.iter() {
            self.insert(k, v);
        }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for EvalMetrics {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        let mut metrics = Self::new();
        for (k, v) in iter {
            metrics.insert(k, v);
        }
        metrics
    }
}

/// Write one `key = value` line per metric.
pub fn write_eval_results(path: &Path, metrics: &EvalMetrics) -> TrainingResult<()> {
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    for (key, value) in metrics.iter() {
        writeln!(out, "{key} = {value}")?;
    }
    out.flush()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: u64,
    pub epoch: f64,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
}

/// Progress of a run, saved next to the final model and in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub epoch: f64,
    pub global_step: u64,
    pub max_steps: u64,
    pub num_train_epochs: u64,
    pub train_batch_size: usize,
    pub seed: u64,
    #[serde(default)]
    pub log_history: Vec<LogEntry>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrainerState {
    #[must_use]
    pub fn new(train_batch_size: usize, seed: u64) -> Self {
        Self {
            epoch: 0.0,
            global_step: 0,
            max_steps: 0,
            num_train_epochs: 0,
            train_batch_size,
            seed,
            log_history: Vec::new(),
            started_at: None,
            updated_at: None,
        }
    }

    pub fn load_from_json(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::Trainer(format!("cannot read trainer state {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save_to_json(&self, path: &Path) -> TrainingResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Train, continuing from `resume_from_checkpoint` when given.
    async fn train(&mut self, resume_from_checkpoint: Option<&Path>) -> TrainingResult<EvalMetrics>;

    async fn evaluate(&mut self) -> TrainingResult<EvalMetrics>;

    /// Save model weights and config into `output_dir`.
    async fn save_model(&self, output_dir: &Path) -> TrainingResult<()>;

    fn is_world_process_zero(&self) -> bool;

    fn state(&self) -> &TrainerState;

    fn status(&self) -> TrainerStatus;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_eval_results_lines_in_insertion_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(EVAL_RESULTS_FILE);
        let metrics: EvalMetrics = [("loss", 1.23), ("accuracy", 0.87)].into_iter().collect();

        write_eval_results(&path, &metrics).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["loss = 1.23", "accuracy = 0.87"]);
    }

    #[test]
    fn test_metrics_insert_replaces_in_place() {
        let mut metrics = EvalMetrics::new();
        metrics.insert("a", 1.0);
        metrics.insert("b", 2.0);
        metrics.insert("a", 3.0);
        assert_eq!(metrics.iter().collect::<Vec<_>>(), vec![("a", 3.0), ("b", 2.0)]);
        assert_eq!(metrics.get("missing"), None);
    }

    #[test]
    fn test_trainer_state_round_trips_through_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(TRAINER_STATE_FILE);
        let mut state = TrainerState::new(4, 42);
        state.global_step = 10;
        state.log_history.push(LogEntry {
            step: 10,
            epoch: 1.0,
            values: BTreeMap::from([("loss".to_string(), 0.5)]),
        });

        state.save_to_json(&path).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["log_history"][0]["loss"], 0.5);
        assert_eq!(TrainerState::load_from_json(&path).unwrap(), state);
    }
}
