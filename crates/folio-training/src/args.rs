//! Argument records for a pretraining run.
//!
//! The three records can be populated from command-line flags or from a single
//! JSON configuration file. Both forms go through the same clap parser so they
//! share defaults and validation; a JSON object is rewritten into `--key=value`
//! flags before parsing.

use crate::collator::Padding;
use crate::error::{TrainingError, TrainingResult};
use crate::model::ModelType;
use clap::{ArgAction, Args, Parser, ValueEnum};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Arguments pertaining to which model/config/tokenizer we pretrain from.
#[derive(Debug, Clone, Args, Serialize)]
#[command(rename_all = "snake_case")]
pub struct ModelArguments {
    /// Pretrained model directory, or a name resolved under the cache directory
    #[arg(long)]
    pub model_name_or_path: String,

    /// Pretrained config name or path, if not the same as model_name_or_path
    #[arg(long)]
    pub config_name: Option<String>,

    /// Pretrained tokenizer name or path, if not the same as model_name_or_path
    #[arg(long)]
    pub tokenizer_name: Option<String>,

    /// Where pretrained artifacts and feature caches are stored (default: <output_dir>/cache)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Prefix of backbone weights inside the pretrained state
    #[arg(long)]
    pub backbone_weights_prefix: Option<String>,

    /// Re-initialize parameters whose saved shape does not match the config
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub ignore_mismatched_sizes: bool,

    #[arg(skip = -1)]
    pub local_rank: i64,

    #[arg(skip)]
    pub seed: u64,
}

/// Arguments pertaining to what data we train and evaluate on.
#[derive(Debug, Clone, Args, Serialize)]
#[command(rename_all = "snake_case")]
pub struct DataArguments {
    /// Model family to instantiate
    #[arg(long, value_enum, default_value_t = ModelType::Unimodel)]
    pub model_type: ModelType,

    /// Root directory holding one sub-directory per corpus
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Maximum encoder sequence length after tokenization
    #[arg(long, default_value_t = 512)]
    pub max_seq_length: usize,

    /// Maximum decoder (target) sequence length after tokenization
    #[arg(long, default_value_t = 512)]
    pub max_seq_length_decoder: usize,

    /// Pad every batch to the maximum length instead of the longest example
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub pad_to_max_length: bool,

    /// Prepend a space marker to the first word of every document
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub add_prefix_space: bool,

    /// Vision (MAE) backbone variant
    #[arg(long, default_value = "mae_vit_large_patch16")]
    pub mae_version: String,

    /// Vision (MAE) backbone checkpoint
    #[arg(long)]
    pub mae_checkpoint: Option<PathBuf>,

    /// Input image resolution
    #[arg(long, default_value_t = 224)]
    pub image_size: usize,

    /// Train on the self-supervised document corpus tasks
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub do_selfsupervised: bool,

    /// Train on the supervised benchmark corpora
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub do_supervised: bool,

    #[arg(skip = -1)]
    pub local_rank: i64,

    #[arg(skip)]
    pub seed: u64,

    #[arg(skip)]
    pub padding: Padding,
}

/// Mixed-precision backend requested for the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fp16Backend {
    #[default]
    Auto,
    Amp,
    Apex,
}

/// Arguments pertaining to the training loop itself.
#[derive(Debug, Clone, Args, Serialize)]
#[command(rename_all = "snake_case")]
pub struct TrainingArguments {
    /// Directory where checkpoints, the final model and results are written
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Overwrite the content of the output directory instead of resuming
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub overwrite_output_dir: bool,

    /// Run training
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub do_train: bool,

    /// Run evaluation on the validation split
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub do_eval: bool,

    #[arg(long, default_value_t = 8)]
    pub per_device_train_batch_size: usize,

    #[arg(long, default_value_t = 8)]
    pub per_device_eval_batch_size: usize,

    #[arg(long, default_value_t = 5e-5)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 3.0)]
    pub num_train_epochs: f64,

    /// Total optimization steps; overrides num_train_epochs when positive
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_steps: i64,

    /// Log training loss every N steps (0 disables)
    #[arg(long, default_value_t = 500)]
    pub logging_steps: u64,

    /// Save a checkpoint every N steps (0 disables)
    #[arg(long, default_value_t = 500)]
    pub save_steps: u64,

    /// Keep at most this many checkpoints in the output directory
    #[arg(long)]
    pub save_total_limit: Option<usize>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Rank of this process in distributed training (-1 when not distributed)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub local_rank: i64,

    /// Use 16-bit mixed precision
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    pub fp16: bool,

    #[arg(long, value_enum, default_value_t = Fp16Backend::Auto)]
    pub fp16_backend: Fp16Backend,

    /// Override the rank-derived log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(skip)]
    pub logging_dir: PathBuf,
}

impl TrainingArguments {
    /// The primary process performs all filesystem side effects.
    #[must_use]
    pub fn is_main_process(&self) -> bool {
        is_main_process(self.local_rank)
    }

    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.local_rank != -1
    }
}

#[must_use]
pub fn is_main_process(local_rank: i64) -> bool {
    matches!(local_rank, -1 | 0)
}

/// Raw parser over the three argument groups.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "folio-pretrain",
    version,
    about = "Pretrain a document-understanding model",
    long_about = "Pretrain a document-understanding model.\n\n\
                  Pass either flag-style arguments or a single path to a JSON file \
                  whose keys are the flag names."
)]
pub struct PretrainArgs {
    #[command(flatten)]
    pub model: ModelArguments,

    #[command(flatten)]
    pub data: DataArguments,

    #[command(flatten)]
    pub training: TrainingArguments,
}

/// Returns the config path when the invocation is `<bin> <file>.json`.
#[must_use]
pub fn json_config_path(argv: &[OsString]) -> Option<PathBuf> {
    match argv {
        [_, only] if Path::new(only).extension().is_some_and(|ext| ext == "json") => {
            Some(PathBuf::from(only))
        }
        _ => None,
    }
}

impl PretrainArgs {
    /// Load the three argument records from a JSON configuration file.
    pub fn from_json_file(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::InvalidArguments(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse a JSON object whose keys are flag names.
    pub fn from_json_str(contents: &str) -> TrainingResult<Self> {
        let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| {
            TrainingError::InvalidArguments(format!("config is not valid JSON: {e}"))
        })?;
        let serde_json::Value::Object(map) = value else {
            return Err(TrainingError::InvalidArguments(
                "config must be a JSON object mapping argument names to values".to_string(),
            ));
        };

        let mut argv = vec!["folio-pretrain".to_string()];
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s,
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(TrainingError::InvalidArguments(format!(
                        "config key `{key}` must be a scalar value"
                    )));
                }
            };
            argv.push(format!("--{key}={rendered}"));
        }

        Self::try_parse_from(argv).map_err(|e| TrainingError::InvalidArguments(e.to_string()))
    }

    /// Validate and derive the post-parse fields, producing the immutable bundle.
    ///
    /// Creates the cache directory as a side effect.
    pub fn finalize(self) -> TrainingResult<ArgumentBundle> {
        let Self { mut model, mut data, mut training } = self;
        validate(&data, &training)?;

        model.local_rank = training.local_rank;
        model.seed = training.seed;
        let cache_dir = model
            .cache_dir
            .get_or_insert_with(|| training.output_dir.join("cache"))
            .clone();
        std::fs::create_dir_all(&cache_dir)?;

        data.local_rank = training.local_rank;
        data.seed = training.seed;
        data.padding = if data.pad_to_max_length { Padding::MaxLength } else { Padding::Longest };

        training.logging_dir = training.output_dir.join("runs");

        Ok(ArgumentBundle { model, data, training, cache_dir })
    }
}

fn validate(data: &DataArguments, training: &TrainingArguments) -> TrainingResult<()> {
    let invalid = |msg: &str| Err(TrainingError::InvalidArguments(msg.to_string()));

    if training.per_device_train_batch_size == 0 {
        return invalid("per_device_train_batch_size must be >= 1");
    }
    if training.per_device_eval_batch_size == 0 {
        return invalid("per_device_eval_batch_size must be >= 1");
    }
    if !training.learning_rate.is_finite() || training.learning_rate <= 0.0 {
        return invalid("learning_rate must be > 0");
    }
    if training.max_steps <= 0 && !(training.num_train_epochs > 0.0) {
        return invalid("num_train_epochs must be > 0 when max_steps is not set");
    }
    if data.max_seq_length == 0 || data.max_seq_length_decoder == 0 {
        return invalid("max_seq_length and max_seq_length_decoder must be >= 1");
    }
    if data.image_size == 0 {
        return invalid("image_size must be >= 1");
    }
    Ok(())
}

/// Finalized, read-only arguments for one run.
#[derive(Debug, Clone, Serialize)]
pub struct ArgumentBundle {
    pub model: ModelArguments,
    pub data: DataArguments,
    pub training: TrainingArguments,
    /// Resolved cache directory (always set after finalize).
    pub cache_dir: PathBuf,
}
