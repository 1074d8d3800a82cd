//! Reference document model used by the local trainer.
//!
//! The model keeps smoothed token-frequency tables instead of transformer
//! weights: one shared table for the unimodel variant, separate encoder and
//! decoder tables for the dual variant. Loss is the negative log-likelihood of
//! target tokens under the decoder-side table.

use super::ModelType;
use super::config::{CONFIG_FILE, DocModelConfig};
use super::pretrained::{read_json, resolve_optional_file, write_json};
use crate::collator::Batch;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MODEL_STATE_FILE: &str = "model_state.json";

const SHARED: &str = "shared";
const ENCODER: &str = "encoder";
const DECODER: &str = "decoder";

/// Pseudo-count every table entry starts from.
const INIT_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTable {
    weights: Vec<f64>,
    total: f64,
}

impl TokenTable {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { weights: vec![INIT_WEIGHT; size], total: INIT_WEIGHT * size as f64 }
    }

    fn from_weights(weights: Vec<f64>) -> Self {
        let total = weights.iter().sum();
        Self { weights, total }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn resize(&mut self, size: usize) {
        self.weights.resize(size, INIT_WEIGHT);
        self.total = self.weights.iter().sum();
    }

    /// Negative log-likelihood of `token`; out-of-table ids get the smallest mass.
    #[must_use]
    pub fn nll(&self, token: u32) -> f64 {
        let weight = self.weights.get(token as usize).copied().unwrap_or(INIT_WEIGHT);
        -(weight / self.total.max(f64::MIN_POSITIVE)).ln()
    }

    pub fn observe(&mut self, token: u32, amount: f64) {
        if let Some(weight) = self.weights.get_mut(token as usize) {
            *weight += amount;
            self.total += amount;
        }
    }
}

/// Serialized model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelState {
    model_type: ModelType,
    tables: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct DocModel {
    model_type: ModelType,
    config: DocModelConfig,
    tables: BTreeMap<&'static str, TokenTable>,
}

impl DocModel {
    fn table_names(model_type: ModelType) -> &'static [&'static str] {
        match model_type {
            ModelType::Unimodel => &[SHARED],
            ModelType::Dual => &[ENCODER, DECODER],
        }
    }

    /// A freshly initialized model.
    #[must_use]
    pub fn new(model_type: ModelType, config: DocModelConfig) -> Self {
        let tables = Self::table_names(model_type)
            .iter()
            .map(|&name| (name, TokenTable::new(config.vocab_size)))
            .collect();
        Self { model_type, config, tables }
    }

    /// Build from `source` with `config`, loading saved state when the source has one.
    ///
    /// Saved tables whose size differs from `config.vocab_size` are re-initialized
    /// when `ignore_mismatched_sizes` is set and rejected otherwise.
    pub fn from_pretrained(
        model_type: ModelType,
        source: &str,
        config: DocModelConfig,
        cache_dir: &Path,
        ignore_mismatched_sizes: bool,
    ) -> TrainingResult<Self> {
        let mut model = Self::new(model_type, config);
        let Some(state_path) = resolve_optional_file(source, MODEL_STATE_FILE, cache_dir) else {
            tracing::warn!(
                "No saved state found for {source}; all weights of {} are newly initialized",
                model_type.architecture()
            );
            return Ok(model);
        };

        let state: ModelState = read_json(&state_path)?;
        let prefix = model.config.backbone_weights_prefix.clone();
        for &name in Self::table_names(model_type) {
            let saved = prefix
                .as_deref()
                .and_then(|p| state.tables.get(&format!("{p}.{name}")))
                .or_else(|| state.tables.get(name));
            let Some(saved) = saved else {
                tracing::warn!(
                    "Table `{name}` missing from {}; newly initialized",
                    state_path.display()
                );
                continue;
            };

            if saved.len() != model.config.vocab_size {
                let reason = format!(
                    "size mismatch for `{name}`: checkpoint has {}, model expects {}",
                    saved.len(),
                    model.config.vocab_size
                );
                if !ignore_mismatched_sizes {
                    return Err(TrainingError::pretrained(&state_path, reason));
                }
                tracing::warn!("{reason}; newly initialized");
                continue;
            }
            model.tables.insert(name, TokenTable::from_weights(saved.clone()));
        }
        Ok(model)
    }

    /// Restore parameters saved by [`DocModel::save_pretrained`]; sizes must match exactly.
    pub fn load_state(&mut self, dir: &Path) -> TrainingResult<()> {
        let path = dir.join(MODEL_STATE_FILE);
        let state: ModelState = read_json(&path)?;
        if state.model_type != self.model_type {
            return Err(TrainingError::pretrained(
                &path,
                format!(
                    "saved model type {:?} does not match {:?}",
                    state.model_type, self.model_type
                ),
            ));
        }
        for &name in Self::table_names(self.model_type) {
            let saved = state
                .tables
                .get(name)
                .filter(|t| t.len() == self.config.vocab_size)
                .ok_or_else(|| {
                    TrainingError::pretrained(&path, format!("missing or mis-sized table `{name}`"))
                })?;
            self.tables.insert(name, TokenTable::from_weights(saved.clone()));
        }
        Ok(())
    }

    /// Write `config.json` and `model_state.json` into `dir`.
    pub fn save_pretrained(&self, dir: &Path) -> TrainingResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        write_json(&dir.join(CONFIG_FILE), &self.config)?;

        let state = ModelState {
            model_type: self.model_type,
            tables: self
                .tables
                .iter()
                .map(|(name, table)| ((*name).to_string(), table.weights.clone()))
                .collect(),
        };
        let path = dir.join(MODEL_STATE_FILE);
        write_json(&path, &state)?;
        Ok(path)
    }

    #[must_use]
    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    #[must_use]
    pub fn config(&self) -> &DocModelConfig {
        &self.config
    }

    /// Number of rows in the token embedding table(s).
    #[must_use]
    pub fn num_embeddings(&self) -> usize {
        self.config.vocab_size
    }

    pub fn resize_token_embeddings(&mut self, size: usize) {
        if size == self.config.vocab_size {
            return;
        }
        tracing::info!("Resizing token embeddings from {} to {size}", self.config.vocab_size);
        for table in self.tables.values_mut() {
            table.resize(size);
        }
        self.config.vocab_size = size;
    }

    fn target_table(&self) -> &TokenTable {
        let name = match self.model_type {
            ModelType::Unimodel => SHARED,
            ModelType::Dual => DECODER,
        };
        &self.tables[name]
    }

    /// Summed loss and number of target tokens for a batch.
    #[must_use]
    pub fn loss(&self, batch: &Batch) -> (f64, usize) {
        let table = self.target_table();
        batch.target_tokens().fold((0.0, 0), |(sum, n), token| (sum + table.nll(token), n + 1))
    }

    /// One update step; returns the pre-update mean loss of the batch.
    pub fn train_step(&mut self, batch: &Batch, learning_rate: f64, reference_lr: f64) -> f64 {
        let (sum, count) = self.loss(batch);
        let amount = learning_rate / reference_lr.max(f64::MIN_POSITIVE);

        let inputs = batch
            .input_ids
            .iter()
            .zip(&batch.attention_mask)
            .flat_map(|(ids, mask)| {
                ids.iter().zip(mask).filter(|(_, m)| **m == 1).map(|(id, _)| *id)
            });
        match self.model_type {
            ModelType::Unimodel => {
                if let Some(shared) = self.tables.get_mut(SHARED) {
                    for token in inputs.chain(batch.target_tokens()) {
                        shared.observe(token, amount);
                    }
                }
            }
            ModelType::Dual => {
                if let Some(encoder) = self.tables.get_mut(ENCODER) {
                    for token in inputs {
                        encoder.observe(token, amount);
                    }
                }
                if let Some(decoder) = self.tables.get_mut(DECODER) {
                    for token in batch.target_tokens() {
                        decoder.observe(token, amount);
                    }
                }
            }
        }

        if count == 0 { 0.0 } else { sum / count as f64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collator::{DataCollator, Padding};
    use crate::dataset::DocFeatures;
    use tempfile::TempDir;

    fn batch(labels: Vec<u32>) -> Batch {
        let feature =
            DocFeatures { input_ids: vec![1, 2], bbox: vec![[0.0; 4]; 2], labels, image: None };
        DataCollator::new(Padding::Longest, 8, 8, 0).collate(&[feature])
    }

    #[test]
    fn test_training_lowers_loss_on_repeated_targets() {
        let mut model = DocModel::new(ModelType::Unimodel, DocModelConfig::new(16));
        let b = batch(vec![5, 5, 5]);
        let first = model.train_step(&b, 1.0, 1.0);
        let second = model.train_step(&b, 1.0, 1.0);
        assert!(second < first);
    }

    #[test]
    fn test_resize_token_embeddings_updates_config_and_tables() {
        let mut model = DocModel::new(ModelType::Dual, DocModelConfig::new(8));
        model.resize_token_embeddings(12);
        assert_eq!(model.num_embeddings(), 12);
        assert!(model.tables.values().all(|t| t.len() == 12));
    }

    #[test]
    fn test_save_and_load_state() {
        let temp = TempDir::new().unwrap();
        let mut model = DocModel::new(ModelType::Dual, DocModelConfig::new(8));
        model.train_step(&batch(vec![3]), 1.0, 1.0);
        model.save_pretrained(temp.path()).unwrap();
        assert!(temp.path().join(CONFIG_FILE).is_file());

        let mut restored = DocModel::new(ModelType::Dual, DocModelConfig::new(8));
        restored.load_state(temp.path()).unwrap();
        assert_eq!(restored.tables, model.tables);

        let mut wrong = DocModel::new(ModelType::Unimodel, DocModelConfig::new(8));
        assert!(wrong.load_state(temp.path()).is_err());
    }

    #[test]
    fn test_mismatched_sizes_respect_leniency_flag() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().to_str().unwrap();
        let saved = DocModel::new(ModelType::Unimodel, DocModelConfig::new(8));
        saved.save_pretrained(temp.path()).unwrap();
        let load = |lenient: bool| {
            let config = DocModelConfig::new(10);
            DocModel::from_pretrained(ModelType::Unimodel, source, config, temp.path(), lenient)
        };

        let lenient = load(true).unwrap();
        assert_eq!(lenient.target_table().len(), 10);

        let strict = load(false);
        assert!(matches!(strict, Err(TrainingError::Pretrained { .. })));
    }

    #[test]
    fn test_backbone_prefix_selects_prefixed_tables() {
        let temp = TempDir::new().unwrap();
        let state = serde_json::json!({
            "model_type": "unimodel",
            "tables": { "backbone.shared": [5.0, 1.0, 1.0, 1.0] }
        });
        std::fs::write(temp.path().join(MODEL_STATE_FILE), state.to_string()).unwrap();

        let mut config = DocModelConfig::new(4);
        config.backbone_weights_prefix = Some("backbone".to_string());
        let source = temp.path().to_str().unwrap();
        let model =
            DocModel::from_pretrained(ModelType::Unimodel, source, config, temp.path(), false)
                .unwrap();
        assert!(model.target_table().nll(0) < model.target_table().nll(1));
    }
}
