use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(
        "output directory ({}) already exists and is not empty; \
         use --overwrite_output_dir to overcome",
        path.display()
    )]
    OutputDirNotEmpty { path: PathBuf },

    #[error(
        "no training data selected: enable --do_selfsupervised and/or --do_supervised \
         when --do_train is set"
    )]
    NoTrainingData,

    #[error("failed to load pretrained artifact {}: {reason}", path.display())]
    Pretrained { path: PathBuf, reason: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn pretrained(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Pretrained { path: path.into(), reason: reason.to_string() }
    }
}
