//! Config, model and tokenizer loading.
//!
//! [`ModelType`] is the closed set of model families; each variant knows how
//! to build its config, model and tokenizer from a pretrained source.

pub mod config;
pub mod doc_model;
pub mod pretrained;
pub mod tokenizer;

pub use config::{DocModelConfig, NormBackend};
pub use doc_model::DocModel;
pub use tokenizer::{DocTokenizer, TokenizerConfig};

use crate::args::{ArgumentBundle, DataArguments, ModelArguments};
use crate::error::TrainingResult;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Single encoder over text, layout and image patches.
    #[value(alias = "UdopUnimodel")]
    #[serde(alias = "UdopUnimodel")]
    Unimodel,
    /// Separate text-layout and vision encoders.
    #[value(alias = "UdopDual")]
    #[serde(alias = "UdopDual")]
    Dual,
}

impl ModelType {
    #[must_use]
    pub fn architecture(self) -> &'static str {
        match self {
            Self::Unimodel => "DocUnimodelForConditionalGeneration",
            Self::Dual => "DocDualForConditionalGeneration",
        }
    }

    /// Load the config and inject run-specific fields.
    pub fn load_config(self, args: &ArgumentBundle) -> TrainingResult<DocModelConfig> {
        let (model, data) = (&args.model, &args.data);
        let source = model.config_name.as_deref().unwrap_or(&model.model_name_or_path);
        let path = pretrained::resolve_file(source, config::CONFIG_FILE, &args.cache_dir)?;
        let mut config: DocModelConfig = pretrained::read_json(&path)?;

        config.architectures = vec![self.architecture().to_string()];
        config.cache_dir = Some(args.cache_dir.clone());
        config.backbone_weights_prefix.clone_from(&model.backbone_weights_prefix);
        config.max_seq_len = data.max_seq_length;

        config.data_dir = Some(data.data_dir.clone());
        config.mae_version = Some(data.mae_version.clone());
        config.mae_checkpoint.clone_from(&data.mae_checkpoint);
        config.image_size = data.image_size;
        config.apply_norm_backend(NormBackend::for_fp16_backend(args.training.fp16_backend));
        Ok(config)
    }

    pub fn load_model(
        self,
        model: &ModelArguments,
        config: DocModelConfig,
        cache_dir: &Path,
    ) -> TrainingResult<DocModel> {
        DocModel::from_pretrained(
            self,
            &model.model_name_or_path,
            config,
            cache_dir,
            model.ignore_mismatched_sizes,
        )
    }

    pub fn load_tokenizer(
        self,
        model: &ModelArguments,
        data: &DataArguments,
        cache_dir: &Path,
    ) -> TrainingResult<DocTokenizer> {
        let source = model.tokenizer_name.as_deref().unwrap_or(&model.model_name_or_path);
        let mut tokenizer =
            DocTokenizer::from_pretrained(source, cache_dir, data.add_prefix_space)?;
        if data.max_seq_length > tokenizer.model_max_length() {
            tokenizer.set_model_max_length(data.max_seq_length);
        }
        Ok(tokenizer)
    }

    /// Config, model and tokenizer for a run.
    ///
    /// The embedding table is resized only after the tokenizer is final, since
    /// loading the tokenizer may add special tokens.
    pub fn load_bundle(self, args: &ArgumentBundle) -> TrainingResult<ModelBundle> {
        let config = self.load_config(args)?;
        let mut model = self.load_model(&args.model, config, &args.cache_dir)?;
        let tokenizer = self.load_tokenizer(&args.model, &args.data, &args.cache_dir)?;
        model.resize_token_embeddings(tokenizer.len());
        Ok(ModelBundle { model, tokenizer })
    }
}

/// A model and its tokenizer; the final config lives on the model.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub model: DocModel,
    pub tokenizer: DocTokenizer,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Pretrained fixtures shared by tests across the crate.

    use super::*;
    use std::path::PathBuf;

    pub(crate) const BASE_WORDS: &[&str] = &[
        "\u{2581}invoice",
        "\u{2581}total",
        "\u{2581}date",
        "\u{2581}name",
        "\u{2581}what",
        "\u{2581}is",
        "\u{2581}the",
        "\u{2581}amount",
        "\u{2581}figure",
        "\u{2581}table",
    ];

    /// Writes a tiny pretrained source (config + vocab) and returns its directory.
    pub(crate) fn write_pretrained(root: &Path, model_max_length: usize) -> PathBuf {
        let dir = root.join("pretrained");
        std::fs::create_dir_all(&dir).unwrap();

        let mut vocab: Vec<String> = ["<pad>", "</s>", "<unk>"].map(String::from).to_vec();
        vocab.extend(BASE_WORDS.iter().map(|w| (*w).to_string()));
        let map: serde_json::Map<String, serde_json::Value> =
            vocab.iter().enumerate().map(|(i, t)| (t.clone(), serde_json::json!(i))).collect();
        let vocab_json = serde_json::Value::Object(map).to_string();
        std::fs::write(dir.join(tokenizer::VOCAB_FILE), vocab_json).unwrap();

        let tok_config = TokenizerConfig {
            model_max_length,
            add_prefix_space: true,
            extra_ids: 8,
            loc_bins: 16,
        };
        std::fs::write(
            dir.join(tokenizer::TOKENIZER_CONFIG_FILE),
            serde_json::to_string(&tok_config).unwrap(),
        )
        .unwrap();

        let config = DocModelConfig::new(vocab.len());
        let config_json = serde_json::to_string(&config).unwrap();
        std::fs::write(dir.join(config::CONFIG_FILE), config_json).unwrap();
        dir
    }
}
