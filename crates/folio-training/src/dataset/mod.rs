//! Corpus datasets and the training/evaluation sets built from them.
//!
//! Each [`CorpusDataset`] reads one JSONL split of a corpus, encodes it for a
//! task and caches the encoded features under `<cache_dir>/features/`.

pub mod cache;
pub mod corpus;
pub mod encode;
pub mod record;

pub use corpus::{Corpus, Split, Task};
pub use encode::EncodeLimits;
pub use record::{DocumentRecord, Region};

use crate::args::{ArgumentBundle, DataArguments, is_main_process};
use crate::error::{TrainingError, TrainingResult};
use crate::model::DocTokenizer;
use cache::CacheKey;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Group label all training datasets are concatenated under.
pub const LANG_GROUP: &str = "lang";

/// One encoded example: encoder inputs with their boxes, and decoder targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocFeatures {
    pub input_ids: Vec<u32>,
    pub bbox: Vec<[f32; 4]>,
    pub labels: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
}

pub trait DocDataset: Send + Sync + std::fmt::Debug {
    fn name(&self) -> String;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<&DocFeatures>;
}

#[derive(Debug, Clone)]
pub struct CorpusDataset {
    corpus: Corpus,
    task: Task,
    split: Split,
    features: Vec<DocFeatures>,
}

impl CorpusDataset {
    /// Read, encode and cache `<data_dir>/<corpus>/<split>.jsonl` for `task`.
    ///
    /// Only the main process writes the feature cache; other ranks reuse it
    /// when present and encode in memory otherwise.
    pub fn new(
        corpus: Corpus,
        task: Task,
        split: Split,
        data_args: &DataArguments,
        tokenizer: &DocTokenizer,
        cache_dir: &Path,
    ) -> TrainingResult<Self> {
        let source = data_args.data_dir.join(corpus.dir_name()).join(split.file_name());
        let contents = std::fs::read_to_string(&source).map_err(|e| {
            TrainingError::Dataset(format!(
                "cannot read {corpus} {split} split at {}: {e}",
                source.display()
            ))
        })?;

        let key = CacheKey {
            corpus,
            task,
            split,
            limits: EncodeLimits {
                max_seq_length: data_args.max_seq_length,
                max_seq_length_decoder: data_args.max_seq_length_decoder,
            },
            seed: data_args.seed,
            vocab_size: tokenizer.len(),
        };
        let cache_path = key.path(cache_dir, &key.digest(contents.as_bytes()));

        if let Some(features) = cache::load_features(&cache_path)? {
            tracing::info!("Loading features from cached file {}", cache_path.display());
            return Ok(Self { corpus, task, split, features });
        }

        tracing::info!("Creating {task} features from {}", source.display());
        let records = record::parse_jsonl_records(&contents, &source)?;
        let mut rng = StdRng::seed_from_u64(data_args.seed ^ task_salt(task));
        let features: Vec<DocFeatures> = records
            .iter()
            .filter_map(|r| encode::encode_record(task, r, tokenizer, key.limits, &mut rng))
            .collect();
        if features.len() < records.len() {
            tracing::warn!(
                "{corpus}/{task}: skipped {} of {} records lacking the fields the task needs",
                records.len() - features.len(),
                records.len()
            );
        }

        if is_main_process(data_args.local_rank) {
            cache::store_features(&cache_path, &features)?;
            tracing::info!(
                "Saved {} features into cached file {}",
                features.len(),
                cache_path.display()
            );
        }
        Ok(Self { corpus, task, split, features })
    }

    #[must_use]
    pub fn corpus(&self) -> Corpus {
        self.corpus
    }

    #[must_use]
    pub fn task(&self) -> Task {
        self.task
    }
}

/// Per-task offset mixed into the seed so tasks over one corpus mask different spans.
fn task_salt(task: Task) -> u64 {
    let digest = Sha256::digest(task.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

impl DocDataset for CorpusDataset {
    fn name(&self) -> String {
        format!("{}/{}/{}", self.corpus, self.split, self.task)
    }

    fn len(&self) -> usize {
        self.features.len()
    }

    fn get(&self, index: usize) -> Option<&DocFeatures> {
        self.features.get(index)
    }
}

/// Several datasets indexed as one, in order.
#[derive(Debug, Clone)]
pub struct ConcatDataset {
    parts: Vec<Arc<dyn DocDataset>>,
    cumulative_sizes: Vec<usize>,
}

impl ConcatDataset {
    #[must_use]
    pub fn new(parts: Vec<Arc<dyn DocDataset>>) -> Self {
        let cumulative_sizes = parts
            .iter()
            .scan(0, |total, part| {
                *total += part.len();
                Some(*total)
            })
            .collect();
        Self { parts, cumulative_sizes }
    }

    #[must_use]
    pub fn num_datasets(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn parts(&self) -> &[Arc<dyn DocDataset>] {
        &self.parts
    }
}

impl DocDataset for ConcatDataset {
    fn name(&self) -> String {
        let names: Vec<String> = self.parts.iter().map(|p| p.name()).collect();
        format!("concat[{}]", names.join(", "))
    }

    fn len(&self) -> usize {
        self.cumulative_sizes.last().copied().unwrap_or(0)
    }

    fn get(&self, index: usize) -> Option<&DocFeatures> {
        let part = self.cumulative_sizes.partition_point(|&end| end <= index);
        let start = if part == 0 { 0 } else { self.cumulative_sizes[part - 1] };
        self.parts.get(part)?.get(index - start)
    }
}

/// Training datasets by group label.
pub type DatasetMap = BTreeMap<String, ConcatDataset>;

const SELF_SUPERVISED: &[(Corpus, Task)] = &[
    (Corpus::IitCdip, Task::LayoutModeling),
    (Corpus::IitCdip, Task::TextAndLayoutReconstruction),
    (Corpus::IitCdip, Task::VisualTextRecognition),
];

const SUPERVISED: &[(Corpus, Task)] = &[
    (Corpus::PubLayNet, Task::LayoutAnalysis),
    (Corpus::DocBank, Task::LayoutAnalysis),
    (Corpus::DocBank, Task::InformationExtraction),
    (Corpus::WebSrc, Task::QuestionAnswering),
    (Corpus::VisualMrc, Task::QuestionAnswering),
    (Corpus::Due, Task::DocumentUnderstanding),
];

/// Training datasets, or `None` when training is not requested.
pub fn build_train_datasets(
    args: &ArgumentBundle,
    tokenizer: &DocTokenizer,
) -> TrainingResult<Option<DatasetMap>> {
    if !args.training.do_train {
        return Ok(None);
    }
    let data = &args.data;

    let mut selected: Vec<(Corpus, Task)> = Vec::new();
    if data.do_selfsupervised {
        selected.extend_from_slice(SELF_SUPERVISED);
    }
    if data.do_supervised {
        selected.extend_from_slice(SUPERVISED);
    }
    if selected.is_empty() {
        return Err(TrainingError::NoTrainingData);
    }

    let mut parts: Vec<Arc<dyn DocDataset>> = Vec::with_capacity(selected.len());
    for (corpus, task) in selected {
        let dataset =
            CorpusDataset::new(corpus, task, Split::Train, data, tokenizer, &args.cache_dir)?;
        tracing::info!("Loaded {} with {} examples", dataset.name(), dataset.len());
        parts.push(Arc::new(dataset));
    }

    let mut datasets = DatasetMap::new();
    datasets.insert(LANG_GROUP.to_string(), ConcatDataset::new(parts));
    Ok(Some(datasets))
}

/// Evaluation dataset, or `None` when evaluation is not requested.
pub fn build_eval_dataset(
    args: &ArgumentBundle,
    tokenizer: &DocTokenizer,
) -> TrainingResult<Option<CorpusDataset>> {
    if !args.training.do_eval {
        return Ok(None);
    }
    let dataset = CorpusDataset::new(
        Corpus::IitCdip,
        Task::LayoutModeling,
        Split::Dev,
        &args.data,
        tokenizer,
        &args.cache_dir,
    )?;
    Ok(Some(dataset))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Corpus fixtures shared by tests across the crate.

    use super::*;

    fn record_line(i: usize) -> String {
        let words = ["invoice", "total", "amount", "date", "name", "the", "figure", "table"];
        let n = 4 + i % 4;
        let ws: Vec<&str> = (0..n).map(|k| words[(i + k) % words.len()]).collect();
        let boxes: Vec<[f32; 4]> =
            (0..n).map(|k| [k as f32 * 0.1, 0.1, k as f32 * 0.1 + 0.08, 0.15]).collect();
        serde_json::json!({
            "words": ws,
            "boxes": boxes,
            "regions": [{"label": "table", "bbox": [0.1, 0.2, 0.9, 0.6]}],
            "word_labels": (0..n).map(|k| if k == 1 { "total" } else { "O" }).collect::<Vec<_>>(),
            "question": "what is the total",
            "answers": ["amount"],
        })
        .to_string()
    }

    /// Writes `n` records into `train.jsonl` and `dev.jsonl` for every corpus.
    pub(crate) fn write_corpora(data_dir: &Path, n: usize) {
        let lines: Vec<String> = (0..n).map(record_line).collect();
        let contents = lines.join("\n") + "\n";
        for corpus in [
            Corpus::IitCdip,
            Corpus::PubLayNet,
            Corpus::DocBank,
            Corpus::WebSrc,
            Corpus::VisualMrc,
            Corpus::Due,
        ] {
            let dir = data_dir.join(corpus.dir_name());
            std::fs::create_dir_all(&dir).unwrap();
            for split in [Split::Train, Split::Dev] {
                std::fs::write(dir.join(split.file_name()), &contents).unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::write_corpora;
    use super::*;
    use crate::args::PretrainArgs;
    use crate::model::ModelType;
    use crate::model::testing::write_pretrained;
    use clap::Parser;
    use tempfile::TempDir;

    fn setup(root: &Path, extra: &[&str]) -> (ArgumentBundle, DocTokenizer) {
        let pretrained = write_pretrained(root, 128);
        write_corpora(&root.join("data"), 5);
        let mut flags = vec![
            "folio-pretrain".to_string(),
            "--model_name_or_path".to_string(),
            pretrained.display().to_string(),
            "--data_dir".to_string(),
            root.join("data").display().to_string(),
            "--output_dir".to_string(),
            root.join("out").display().to_string(),
            "--max_seq_length".to_string(),
            "64".to_string(),
        ];
        flags.extend(extra.iter().map(|s| (*s).to_string()));
        let args = PretrainArgs::try_parse_from(flags).unwrap().finalize().unwrap();
        let tokenizer =
            ModelType::Unimodel.load_tokenizer(&args.model, &args.data, &args.cache_dir).unwrap();
        (args, tokenizer)
    }

    #[test]
    fn test_self_supervised_builds_three_datasets() {
        let temp = TempDir::new().unwrap();
        let (args, tok) = setup(temp.path(), &["--do_train", "--do_selfsupervised"]);

        let datasets = build_train_datasets(&args, &tok).unwrap().unwrap();
        assert_eq!(datasets.len(), 1);
        let lang = &datasets[LANG_GROUP];
        assert_eq!(lang.num_datasets(), 3);
        assert_eq!(lang.len(), 15);
        assert!(lang.get(14).is_some());
        assert!(lang.get(15).is_none());
    }

    #[test]
    fn test_supervised_adds_benchmark_datasets() {
        let temp = TempDir::new().unwrap();
        let (args, tok) =
            setup(temp.path(), &["--do_train", "--do_selfsupervised", "--do_supervised"]);
        let datasets = build_train_datasets(&args, &tok).unwrap().unwrap();
        assert_eq!(datasets[LANG_GROUP].num_datasets(), 9);
    }

    #[test]
    fn test_no_task_flags_is_an_error() {
        let temp = TempDir::new().unwrap();
        let (args, tok) = setup(temp.path(), &["--do_train"]);
        let err = build_train_datasets(&args, &tok).unwrap_err();
        assert!(matches!(err, TrainingError::NoTrainingData));
    }

    #[test]
    fn test_nothing_built_without_do_train_or_do_eval() {
        let temp = TempDir::new().unwrap();
        let (args, tok) = setup(temp.path(), &["--do_selfsupervised"]);
        assert!(build_train_datasets(&args, &tok).unwrap().is_none());
        assert!(build_eval_dataset(&args, &tok).unwrap().is_none());
    }

    #[test]
    fn test_eval_dataset_uses_dev_split() {
        let temp = TempDir::new().unwrap();
        let (args, tok) = setup(temp.path(), &["--do_eval"]);
        let eval = build_eval_dataset(&args, &tok).unwrap().unwrap();
        assert_eq!(eval.name(), "iit-cdip/dev/layout_modeling");
        assert_eq!(eval.len(), 5);
    }

    #[test]
    fn test_feature_cache_is_reused() {
        let temp = TempDir::new().unwrap();
        let (args, tok) = setup(temp.path(), &["--do_eval"]);
        let first = build_eval_dataset(&args, &tok).unwrap().unwrap();

        let features_dir = args.cache_dir.join(cache::FEATURES_DIR);
        let cached: Vec<_> = std::fs::read_dir(&features_dir).unwrap().collect();
        assert_eq!(cached.len(), 1);

        let second = build_eval_dataset(&args, &tok).unwrap().unwrap();
        assert_eq!(first.features, second.features);
        assert_eq!(std::fs::read_dir(&features_dir).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_corpus_file_is_a_dataset_error() {
        let temp = TempDir::new().unwrap();
        let (args, tok) = setup(temp.path(), &["--do_eval"]);
        std::fs::remove_file(temp.path().join("data/iit-cdip/dev.jsonl")).unwrap();
        let err = build_eval_dataset(&args, &tok).unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
    }

    #[test]
    fn test_task_salts_are_stable_and_distinct() {
        let tasks = [
            Task::LayoutModeling,
            Task::TextAndLayoutReconstruction,
            Task::VisualTextRecognition,
            Task::LayoutAnalysis,
            Task::InformationExtraction,
            Task::QuestionAnswering,
            Task::DocumentUnderstanding,
        ];
        let salts: std::collections::BTreeSet<u64> = tasks.iter().map(|t| task_salt(*t)).collect();
        assert_eq!(salts.len(), tasks.len());
        assert_eq!(task_salt(Task::LayoutModeling), task_salt(Task::LayoutModeling));
    }

    #[test]
    fn test_concat_dataset_indexes_across_parts() {
        #[derive(Debug)]
        struct Fixed(Vec<DocFeatures>);
        impl DocDataset for Fixed {
            fn name(&self) -> String {
                "fixed".to_string()
            }
            fn len(&self) -> usize {
                self.0.len()
            }
            fn get(&self, index: usize) -> Option<&DocFeatures> {
                self.0.get(index)
            }
        }
        let f = |id| DocFeatures {
            input_ids: vec![id],
            bbox: vec![[0.0; 4]],
            labels: vec![id],
            image: None,
        };
        let concat = ConcatDataset::new(vec![
            Arc::new(Fixed(vec![f(1), f(2)])),
            Arc::new(Fixed(vec![])),
            Arc::new(Fixed(vec![f(3)])),
        ]);
        assert_eq!(concat.len(), 3);
        assert_eq!(concat.get(2).unwrap().input_ids, vec![3]);
        assert!(concat.get(3).is_none());
    }
}
