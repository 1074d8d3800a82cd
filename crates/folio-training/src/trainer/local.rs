use super::{EvalMetrics, LogEntry, TRAINER_STATE_FILE, Trainer, TrainerState, TrainerStatus};
use crate::args::TrainingArguments;
use crate::checkpoint::{CHECKPOINT_PREFIX, rotate_checkpoints};
use crate::collator::{Batch, DataCollator};
use crate::dataset::{DocDataset, DocFeatures};
use crate::error::{TrainingError, TrainingResult};
use crate::model::{DocModel, DocTokenizer, ModelBundle};
use crate::progress::{ProgressEvent, ProgressSink, TracingProgressSink};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

const LOG_HISTORY_FILE: &str = "log_history.jsonl";

/// Position of this process among the training processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    pub size: usize,
    pub rank: usize,
}

impl Default for WorldInfo {
    fn default() -> Self {
        Self { size: 1, rank: 0 }
    }
}

impl WorldInfo {
    /// Read `WORLD_SIZE` and `RANK`; both default to a single process.
    pub fn from_env() -> TrainingResult<Self> {
        Self::from_vars(
            std::env::var("WORLD_SIZE").ok().as_deref(),
            std::env::var("RANK").ok().as_deref(),
        )
    }

    pub fn from_vars(world_size: Option<&str>, rank: Option<&str>) -> TrainingResult<Self> {
        let parse = |name: &str, value: Option<&str>, default: usize| -> TrainingResult<usize> {
            value.map_or(Ok(default), |v| {
                v.trim().parse().map_err(|_| {
                    TrainingError::InvalidArguments(format!("{name} must be an integer, got `{v}`"))
                })
            })
        };
        let size = parse("WORLD_SIZE", world_size, 1)?;
        let rank = parse("RANK", rank, 0)?;
        if size == 0 || rank >= size {
            return Err(TrainingError::InvalidArguments(format!(
                "RANK {rank} is out of range for WORLD_SIZE {size}"
            )));
        }
        Ok(Self { size, rank })
    }
}

/// In-process trainer over [`DocModel`].
///
/// Each epoch shuffles the training set with `seed + epoch` and then keeps
/// every `world.size`-th example starting at `world.rank`, so ranks see
/// disjoint shards and a resumed run replays the same order.
pub struct LocalTrainer {
    args: TrainingArguments,
    model: DocModel,
    tokenizer: DocTokenizer,
    collator: DataCollator,
    train_dataset: Option<Arc<dyn DocDataset>>,
    eval_dataset: Option<Arc<dyn DocDataset>>,
    progress: Arc<dyn ProgressSink>,
    world: WorldInfo,
    state: TrainerState,
    status: TrainerStatus,
}

impl LocalTrainer {
    #[must_use]
    pub fn new(args: TrainingArguments, bundle: ModelBundle, collator: DataCollator) -> Self {
        let state = TrainerState::new(args.per_device_train_batch_size, args.seed);
        Self {
            args,
            model: bundle.model,
            tokenizer: bundle.tokenizer,
            collator,
            train_dataset: None,
            eval_dataset: None,
            progress: Arc::new(TracingProgressSink),
            world: WorldInfo::default(),
            state,
            status: TrainerStatus::Idle,
        }
    }

    #[must_use]
    pub fn with_train_dataset(mut self, dataset: Arc<dyn DocDataset>) -> Self {
        self.train_dataset = Some(dataset);
        self
    }

    #[must_use]
    pub fn with_eval_dataset(mut self, dataset: Arc<dyn DocDataset>) -> Self {
        self.eval_dataset = Some(dataset);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_world(mut self, world: WorldInfo) -> Self {
        self.world = world;
        self
    }

    #[must_use]
    pub fn model(&self) -> &DocModel {
        &self.model
    }

    #[must_use]
    pub fn tokenizer(&self) -> &DocTokenizer {
        &self.tokenizer
    }

    fn shard_order(&self, epoch: u64, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        let mut rng = StdRng::seed_from_u64(self.args.seed.wrapping_add(epoch));
        order.shuffle(&mut rng);
        order.into_iter().skip(self.world.rank).step_by(self.world.size).collect()
    }

    /// Linear decay from the configured rate to zero over `total_steps`.
    fn learning_rate_at(&self, step: u64, total_steps: u64) -> f64 {
        let remaining = total_steps.saturating_sub(step) as f64;
        self.args.learning_rate * remaining / total_steps.max(1) as f64
    }

    fn total_steps(&self, steps_per_epoch: u64) -> (u64, u64) {
        if self.args.max_steps > 0 {
            let max_steps = self.args.max_steps.unsigned_abs();
            (max_steps, max_steps.div_ceil(steps_per_epoch))
        } else {
            let epochs = self.args.num_train_epochs;
            let total = (epochs * steps_per_epoch as f64).ceil() as u64;
            let num_epochs = epochs.ceil() as u64;
            (total.max(1), num_epochs.max(1))
        }
    }

    fn resume_from(&mut self, checkpoint: &Path) -> TrainingResult<()> {
        self.model.load_state(checkpoint)?;
        self.state = TrainerState::load_from_json(&checkpoint.join(TRAINER_STATE_FILE))?;
        tracing::info!(
            "Continuing training from checkpoint {}, global step {}",
            checkpoint.display(),
            self.state.global_step
        );
        Ok(())
    }

    fn record(&mut self, values: BTreeMap<String, f64>) -> TrainingResult<()> {
        let entry = LogEntry { step: self.state.global_step, epoch: self.state.epoch, values };
        if self.is_world_process_zero() && !self.args.logging_dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&self.args.logging_dir)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.args.logging_dir.join(LOG_HISTORY_FILE))?;
            serde_json::to_writer(&mut file, &entry)?;
            file.write_all(b"\n")?;
        }
        let message =
            entry.values.iter().map(|(k, v)| format!("{k}={v:.6}")).collect::<Vec<_>>().join(" ");
        self.progress.on_event(ProgressEvent::Log { step: entry.step, message });
        self.state.log_history.push(entry);
        Ok(())
    }

    fn save_checkpoint(&mut self) -> TrainingResult<()> {
        if !self.is_world_process_zero() {
            return Ok(());
        }
        let step = self.state.global_step;
        let dir: PathBuf = self.args.output_dir.join(format!("{CHECKPOINT_PREFIX}{step}"));
        self.progress.on_event(ProgressEvent::Checkpoint { step, path: dir.clone() });

        self.model.save_pretrained(&dir)?;
        self.tokenizer.save_pretrained(&dir)?;
        self.state.updated_at = Some(chrono::Utc::now());
        self.state.save_to_json(&dir.join(TRAINER_STATE_FILE))?;

        if let Some(limit) = self.args.save_total_limit {
            rotate_checkpoints(&self.args.output_dir, limit.max(1))?;
        }
        Ok(())
    }

    fn collate(&self, dataset: &dyn DocDataset, indices: &[usize]) -> Batch {
        let features: Vec<DocFeatures> =
            indices.iter().filter_map(|&i| dataset.get(i).cloned()).collect();
        self.collator.collate(&features)
    }

    async fn run_training(
        &mut self,
        resume_from_checkpoint: Option<&Path>,
    ) -> TrainingResult<EvalMetrics> {
        let dataset = self.train_dataset.clone().ok_or_else(|| {
            TrainingError::Trainer("train() requires a training dataset".to_string())
        })?;
        let batch_size = self.args.per_device_train_batch_size.max(1);
        let shard_len = self.shard_order(0, dataset.len()).len();
        if shard_len == 0 {
            return Err(TrainingError::Trainer(format!(
                "no training examples for rank {} of {}",
                self.world.rank, self.world.size
            )));
        }
        let steps_per_epoch = shard_len.div_ceil(batch_size) as u64;
        let (total_steps, num_epochs) = self.total_steps(steps_per_epoch);

        if let Some(checkpoint) = resume_from_checkpoint {
            self.resume_from(checkpoint)?;
        }
        self.state.max_steps = total_steps;
        self.state.num_train_epochs = num_epochs;
        self.state.train_batch_size = batch_size;
        self.state.started_at.get_or_insert_with(chrono::Utc::now);

        self.progress.on_event(ProgressEvent::Started { total_steps, num_examples: dataset.len() });
        tracing::info!("  Num Epochs = {num_epochs}");
        tracing::info!("  Instantaneous batch size per device = {batch_size}");

        let started = Instant::now();
        let first_step = self.state.global_step;
        let mut epoch = first_step / steps_per_epoch;
        let mut skip = (first_step % steps_per_epoch) as usize;
        let (mut run_loss, mut logged_loss, mut logged_steps) = (0.0, 0.0, 0u64);

        'epochs: while self.state.global_step < total_steps {
            let order = self.shard_order(epoch, dataset.len());
            for (i, chunk) in order.chunks(batch_size).enumerate().skip(skip) {
                if self.state.global_step >= total_steps {
                    break 'epochs;
                }
                let batch = self.collate(dataset.as_ref(), chunk);
                let lr = self.learning_rate_at(self.state.global_step, total_steps);
                let loss = self.model.train_step(&batch, lr, self.args.learning_rate);

                self.state.global_step += 1;
                self.state.epoch = epoch as f64 + (i + 1) as f64 / steps_per_epoch as f64;
                run_loss += loss;
                logged_loss += loss;
                logged_steps += 1;
                self.progress.on_event(ProgressEvent::Step {
                    step: self.state.global_step,
                    total: total_steps,
                    loss,
                });

                let step = self.state.global_step;
                if self.args.logging_steps > 0 && step % self.args.logging_steps == 0 {
                    self.record(BTreeMap::from([
                        ("loss".to_string(), logged_loss / logged_steps as f64),
                        ("learning_rate".to_string(), lr),
                    ]))?;
                    (logged_loss, logged_steps) = (0.0, 0);
                }
                if self.args.save_steps > 0 && step % self.args.save_steps == 0 {
                    self.save_checkpoint()?;
                }
                tokio::task::yield_now().await;
            }
            skip = 0;
            epoch += 1;
        }

        let steps_run = self.state.global_step - first_step;
        let train_loss = if steps_run == 0 { 0.0 } else { run_loss / steps_run as f64 };
        let mut metrics = EvalMetrics::new();
        metrics.insert("train_runtime", started.elapsed().as_secs_f64());
        metrics.insert("train_samples", dataset.len() as f64);
        metrics.insert("train_loss", train_loss);
        metrics.insert("epoch", self.state.epoch);
        self.record(metrics.iter().map(|(k, v)| (k.to_string(), v)).collect())?;
        self.state.updated_at = Some(chrono::Utc::now());

        self.progress.on_event(ProgressEvent::Finished { global_step: self.state.global_step });
        Ok(metrics)
    }
}

impl std::fmt::Debug for LocalTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrainer")
            .field("model_type", &self.model.model_type())
            .field("world", &self.world)
            .field("global_step", &self.state.global_step)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Trainer for LocalTrainer {
    fn id(&self) -> &'static str {
        "local"
    }

    async fn train(
        &mut self,
        resume_from_checkpoint: Option<&Path>,
    ) -> TrainingResult<EvalMetrics> {
        self.status = TrainerStatus::Running;
        match self.run_training(resume_from_checkpoint).await {
            Ok(metrics) => {
                self.status = TrainerStatus::Finished;
                Ok(metrics)
            }
            Err(err) => {
                self.status = TrainerStatus::Failed(err.to_string());
                Err(err)
            }
        }
    }

    async fn evaluate(&mut self) -> TrainingResult<EvalMetrics> {
        let dataset = self.eval_dataset.clone().ok_or_else(|| {
            TrainingError::Trainer("evaluate() requires an evaluation dataset".to_string())
        })?;
        if dataset.is_empty() {
            return Err(TrainingError::Trainer(format!(
                "evaluation dataset {} is empty",
                dataset.name()
            )));
        }
        tracing::info!("***** Running evaluation *****");
        tracing::info!("  Num examples = {}", dataset.len());

        let indices: Vec<usize> = (0..dataset.len()).collect();
        let (mut sum, mut count) = (0.0, 0usize);
        for chunk in indices.chunks(self.args.per_device_eval_batch_size.max(1)) {
            let (batch_sum, batch_count) = self.model.loss(&self.collate(dataset.as_ref(), chunk));
            sum += batch_sum;
            count += batch_count;
            tokio::task::yield_now().await;
        }

        let eval_loss = if count == 0 { 0.0 } else { sum / count as f64 };
        let mut metrics = EvalMetrics::new();
        metrics.insert("eval_loss", eval_loss);
        metrics.insert("eval_perplexity", eval_loss.exp());
        metrics.insert("eval_samples", dataset.len() as f64);
        metrics.insert("epoch", self.state.epoch);
        self.record(metrics.iter().map(|(k, v)| (k.to_string(), v)).collect())?;
        Ok(metrics)
    }

    async fn save_model(&self, output_dir: &Path) -> TrainingResult<()> {
        if !self.is_world_process_zero() {
            return Ok(());
        }
        tracing::info!("Saving model to {}", output_dir.display());
        self.model.save_pretrained(output_dir)?;
        Ok(())
    }

    fn is_world_process_zero(&self) -> bool {
        self.world.rank == 0 && self.args.is_main_process()
    }

    fn state(&self) -> &TrainerState {
        &self.state
    }

    fn status(&self) -> TrainerStatus {
        self.status.clone()
    }
}
