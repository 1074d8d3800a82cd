use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { total_steps: u64, num_examples: usize },
    Step { step: u64, total: u64, loss: f64 },
    Log { step: u64, message: String },
    Checkpoint { step: u64, path: PathBuf },
    Finished { global_step: u64 },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing`; per-step events go to DEBUG.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total_steps, num_examples } => {
                tracing::info!("***** Running training *****");
                tracing::info!("  Num examples = {num_examples}");
                tracing::info!("  Total optimization steps = {total_steps}");
            }
            ProgressEvent::Step { step, total, loss } => {
                tracing::debug!("step {step}/{total} loss={loss:.4}");
            }
            ProgressEvent::Log { step, message } => tracing::info!("[step {step}] {message}"),
            ProgressEvent::Checkpoint { step, path } => {
                tracing::info!("Saving model checkpoint for step {step} to {}", path.display());
            }
            ProgressEvent::Finished { global_step } => {
                tracing::info!("Training completed after {global_step} steps");
            }
        }
    }
}
