//! Word-level document tokenizer.
//!
//! Besides the pretrained vocabulary the tokenizer always carries sentinel tokens
//! (`<extra_id_N>`) marking masked spans and layout tokens (`<loc_N>`) encoding
//! quantized box coordinates. Those are appended after loading when the
//! vocabulary does not already contain them, which is why the model embedding
//! table has to be resized once the tokenizer is final.

use super::pretrained::{read_json, resolve_file, resolve_optional_file, write_json};
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const VOCAB_FILE: &str = "vocab.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

pub const PAD_TOKEN: &str = "<pad>";
pub const EOS_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";

/// Word-start marker used when `add_prefix_space` is on.
const WORD_START: char = '\u{2581}';

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default = "default_model_max_length")]
    pub model_max_length: usize,
    #[serde(default = "default_true")]
    pub add_prefix_space: bool,
    #[serde(default = "default_extra_ids")]
    pub extra_ids: usize,
    #[serde(default = "default_loc_bins")]
    pub loc_bins: usize,
}

fn default_model_max_length() -> usize {
    512
}

fn default_true() -> bool {
    true
}

fn default_extra_ids() -> usize {
    100
}

fn default_loc_bins() -> usize {
    500
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            model_max_length: default_model_max_length(),
            add_prefix_space: true,
            extra_ids: default_extra_ids(),
            loc_bins: default_loc_bins(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocTokenizer {
    config: TokenizerConfig,
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
    pad_id: u32,
    eos_id: u32,
    unk_id: u32,
    sentinel_start: u32,
    loc_start: u32,
}

impl DocTokenizer {
    /// Build a tokenizer from an ordered base vocabulary.
    pub fn from_vocab(vocab: Vec<String>, config: TokenizerConfig) -> TrainingResult<Self> {
        let mut token_to_id = HashMap::with_capacity(vocab.len());
        for (id, token) in vocab.iter().enumerate() {
            if token_to_id.insert(token.clone(), id as u32).is_some() {
                return Err(TrainingError::pretrained(
                    VOCAB_FILE,
                    format!("duplicate token {token}"),
                ));
            }
        }

        let mut tokenizer = Self {
            config,
            token_to_id,
            id_to_token: vocab,
            pad_id: 0,
            eos_id: 0,
            unk_id: 0,
            sentinel_start: 0,
            loc_start: 0,
        };

        tokenizer.pad_id = tokenizer.add_token(PAD_TOKEN);
        tokenizer.eos_id = tokenizer.add_token(EOS_TOKEN);
        tokenizer.unk_id = tokenizer.add_token(UNK_TOKEN);

        // Sentinel and layout ids must be contiguous so they can be computed by offset.
        tokenizer.sentinel_start =
            tokenizer.add_token_range("extra_id", tokenizer.config.extra_ids);
        tokenizer.loc_start = tokenizer.add_token_range("loc", tokenizer.config.loc_bins);
        Ok(tokenizer)
    }

    /// Load `vocab.json` (token → id) and optional `tokenizer_config.json`.
    pub fn from_pretrained(
        source: &str,
        cache_dir: &Path,
        add_prefix_space: bool,
    ) -> TrainingResult<Self> {
        let vocab_path = resolve_file(source, VOCAB_FILE, cache_dir)?;
        let vocab: BTreeMap<String, u32> = read_json(&vocab_path)?;

        let mut ordered = vec![None; vocab.len()];
        for (token, id) in vocab {
            let slot = ordered.get_mut(id as usize).filter(|slot| slot.is_none()).ok_or_else(|| {
                TrainingError::pretrained(
                    &vocab_path,
                    format!("token ids must be unique and contiguous from 0 (offending id {id})"),
                )
            })?;
            *slot = Some(token);
        }
        let ordered: Vec<String> = ordered.into_iter().flatten().collect();

        let mut config = match resolve_optional_file(source, TOKENIZER_CONFIG_FILE, cache_dir) {
            Some(path) => read_json::<TokenizerConfig>(&path)?,
            None => TokenizerConfig::default(),
        };
        config.add_prefix_space = add_prefix_space;

        Self::from_vocab(ordered, config)
    }

    pub fn save_pretrained(&self, dir: &Path) -> TrainingResult<()> {
        std::fs::create_dir_all(dir)?;
        let vocab: BTreeMap<&str, u32> =
            self.id_to_token.iter().enumerate().map(|(id, t)| (t.as_str(), id as u32)).collect();
        write_json(&dir.join(VOCAB_FILE), &vocab)?;
        write_json(&dir.join(TOKENIZER_CONFIG_FILE), &self.config)?;
        Ok(())
    }

    fn add_token(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.token_to_id.get(token) {
            return id;
        }
        let id = self.id_to_token.len() as u32;
        self.id_to_token.push(token.to_string());
        self.token_to_id.insert(token.to_string(), id);
        id
    }

    fn add_token_range(&mut self, name: &str, count: usize) -> u32 {
        let first = format!("<{name}_0>");
        let existing = self.token_to_id.get(&first).copied();
        if let Some(start) = existing {
            let contiguous = (0..count).all(|i| {
                self.token_to_id.get(&format!("<{name}_{i}>")) == Some(&(start + i as u32))
            });
            if contiguous {
                return start;
            }
        }

        let start = self.id_to_token.len() as u32;
        for i in 0..count {
            let token = format!("<{name}_{i}>");
            let id = self.id_to_token.len() as u32;
            self.id_to_token.push(token.clone());
            self.token_to_id.insert(token, id);
        }
        start
    }

    /// Vocabulary size including added special tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    #[must_use]
    pub fn model_max_length(&self) -> usize {
        self.config.model_max_length
    }

    pub fn set_model_max_length(&mut self, max_length: usize) {
        self.config.model_max_length = max_length;
    }

    #[must_use]
    pub fn pad_token_id(&self) -> u32 {
        self.pad_id
    }

    #[must_use]
    pub fn eos_token_id(&self) -> u32 {
        self.eos_id
    }

    #[must_use]
    pub fn unk_token_id(&self) -> u32 {
        self.unk_id
    }

    #[must_use]
    pub fn loc_bins(&self) -> usize {
        self.config.loc_bins
    }

    /// Id of the `<extra_id_N>` sentinel, wrapping when `n` exceeds the available count.
    #[must_use]
    pub fn sentinel_id(&self, n: usize) -> u32 {
        self.sentinel_start + (n % self.config.extra_ids.max(1)) as u32
    }

    /// Id of the layout token for a normalized coordinate in `[0, 1]`.
    #[must_use]
    pub fn loc_id(&self, coord: f32) -> u32 {
        let bins = self.config.loc_bins.max(1);
        let bin = (coord.clamp(0.0, 1.0) * (bins - 1) as f32).round() as u32;
        self.loc_start + bin
    }

    /// Four layout tokens for a `[x0, y0, x1, y1]` box.
    #[must_use]
    pub fn box_ids(&self, bbox: [f32; 4]) -> [u32; 4] {
        bbox.map(|c| self.loc_id(c))
    }

    /// Token ids for one word. Unknown words fall back to characters, then `<unk>`.
    #[must_use]
    pub fn encode_word(&self, word: &str, first: bool) -> Vec<u32> {
        let marked =
            (!first || self.config.add_prefix_space).then(|| format!("{WORD_START}{word}"));
        if let Some(id) = marked.as_deref().and_then(|m| self.token_to_id.get(m)) {
            return vec![*id];
        }
        if let Some(&id) = self.token_to_id.get(word) {
            return vec![id];
        }

        word.chars()
            .map(|c| {
                let mut buf = [0u8; 4];
                let key: &str = c.encode_utf8(&mut buf);
                self.token_to_id.get(key).copied().unwrap_or(self.unk_id)
            })
            .collect()
    }

    /// Token ids for whitespace-separated text.
    #[must_use]
    pub fn encode_text(&self, text: &str) -> Vec<u32> {
        text.split_whitespace()
            .enumerate()
            .flat_map(|(i, word)| self.encode_word(word, i == 0))
            .collect()
    }

    #[must_use]
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    #[must_use]
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.id_to_token(id))
            .map(|t| t.replace(WORD_START, " "))
            .collect::<String>()
            .trim()
            .to_string()
    }
}
