//! Folio Training
//!
//! Pretraining driver for document-understanding models:
//! - Parsing and finalizing run arguments (`args`)
//! - Resuming from checkpoints in the output directory (`checkpoint`)
//! - Loading config, model and tokenizer by model type (`model`)
//! - Assembling corpus datasets and batching them (`dataset`, `collator`)
//! - Running training and evaluation (`trainer`, `pipeline`)

pub mod args;
pub mod checkpoint;
pub mod collator;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod trainer;

pub use args::{
    ArgumentBundle, DataArguments, Fp16Backend, ModelArguments, PretrainArgs, TrainingArguments,
    json_config_path,
};
pub use checkpoint::{ResumeState, detect_resume, get_last_checkpoint, rotate_checkpoints};
pub use collator::{Batch, DataCollator, IGNORE_INDEX, Padding};
pub use dataset::{
    ConcatDataset, Corpus, CorpusDataset, DatasetMap, DocDataset, DocFeatures, LANG_GROUP, Split,
    Task, build_eval_dataset, build_train_datasets,
};
pub use error::{TrainingError, TrainingResult};
pub use logging::LoggingConfig;
pub use model::{DocModel, DocModelConfig, DocTokenizer, ModelBundle, ModelType};
pub use pipeline::run;
pub use progress::{ProgressEvent, ProgressSink, TracingProgressSink};
pub use trainer::{
    EvalMetrics, LocalTrainer, Trainer, TrainerState, TrainerStatus, WorldInfo, write_eval_results,
};
