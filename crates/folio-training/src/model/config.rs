use crate::args::Fp16Backend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_FILE: &str = "config.json";

/// Normalization kernels the model is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormBackend {
    /// Framework-native layer norm and sync batch norm.
    Native,
    /// Fused kernels from the apex extension.
    Apex,
}

impl NormBackend {
    #[must_use]
    pub fn for_fp16_backend(backend: Fp16Backend) -> Self {
        match backend {
            Fp16Backend::Apex => Self::Apex,
            Fp16Backend::Auto | Fp16Backend::Amp => Self::Native,
        }
    }

    #[must_use]
    pub fn layernorm_type(self) -> &'static str {
        match self {
            Self::Native => "torch_LayerNorm",
            Self::Apex => "apex_FusedLayerNorm",
        }
    }

    #[must_use]
    pub fn syncbn_type(self) -> &'static str {
        match self {
            Self::Native => "torch_SyncBatchNorm",
            Self::Apex => "apex_SyncBatchNorm",
        }
    }
}

/// Model configuration as stored in `config.json`.
///
/// Unknown keys are preserved so a saved config round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocModelConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    pub vocab_size: usize,
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub backbone_weights_prefix: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub mae_version: Option<String>,
    #[serde(default)]
    pub mae_checkpoint: Option<PathBuf>,
    #[serde(default = "default_layernorm_type")]
    pub layernorm_type: String,
    #[serde(default = "default_syncbn_type")]
    pub syncbn_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_d_model() -> usize {
    1024
}

fn default_max_seq_len() -> usize {
    512
}

fn default_image_size() -> usize {
    224
}

fn default_layernorm_type() -> String {
    NormBackend::Native.layernorm_type().to_string()
}

fn default_syncbn_type() -> String {
    NormBackend::Native.syncbn_type().to_string()
}

impl DocModelConfig {
    #[must_use]
    pub fn new(vocab_size: usize) -> Self {
        Self {
            architectures: Vec::new(),
            vocab_size,
            d_model: default_d_model(),
            max_seq_len: default_max_seq_len(),
            image_size: default_image_size(),
            cache_dir: None,
            backbone_weights_prefix: None,
            data_dir: None,
            mae_version: None,
            mae_checkpoint: None,
            layernorm_type: default_layernorm_type(),
            syncbn_type: default_syncbn_type(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn apply_norm_backend(&mut self, backend: NormBackend) {
        self.layernorm_type = backend.layernorm_type().to_string();
        self.syncbn_type = backend.syncbn_type().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_backend_follows_fp16_backend() {
        let mut config = DocModelConfig::new(10);
        config.apply_norm_backend(NormBackend::for_fp16_backend(Fp16Backend::Apex));
        assert_eq!(config.layernorm_type, "apex_FusedLayerNorm");
        assert_eq!(config.syncbn_type, "apex_SyncBatchNorm");

        config.apply_norm_backend(NormBackend::for_fp16_backend(Fp16Backend::Amp));
        assert_eq!(config.layernorm_type, "torch_LayerNorm");
        assert_eq!(config.syncbn_type, "torch_SyncBatchNorm");
    }

    #[test]
    fn test_config_preserves_unknown_keys() {
        let json = r#"{"vocab_size": 32, "num_layers": 24, "dropout_rate": 0.1}"#;
        let config: DocModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.vocab_size, 32);
        assert_eq!(config.max_seq_len, 512);
        assert_eq!(config.extra.get("num_layers"), Some(&serde_json::json!(24)));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["dropout_rate"], serde_json::json!(0.1));
    }
}
