//! Turning document records into model inputs and targets, per task.
//!
//! Self-supervised tasks mask random word spans and mark each with a sentinel
//! token; the target lists the sentinels followed by whatever the task asks the
//! model to recover (layout, text, or both). Supervised tasks prepend the
//! task prompt (and question, if any) to the document words.

use super::DocFeatures;
use super::corpus::Task;
use super::record::{DocumentRecord, union_box};
use crate::model::DocTokenizer;
use rand::Rng;
use rand::rngs::StdRng;

/// Fraction of words masked by self-supervised tasks.
const MASK_RATIO: f64 = 0.15;
const MAX_SPAN_WORDS: usize = 3;

/// Limits applied while encoding.
#[derive(Debug, Clone, Copy)]
pub struct EncodeLimits {
    pub max_seq_length: usize,
    pub max_seq_length_decoder: usize,
}

struct Builder<'a> {
    tokenizer: &'a DocTokenizer,
    input_ids: Vec<u32>,
    bbox: Vec<[f32; 4]>,
    labels: Vec<u32>,
}

impl<'a> Builder<'a> {
    fn new(tokenizer: &'a DocTokenizer, prompt: &str) -> Self {
        let input_ids = tokenizer.encode_text(prompt);
        let bbox = vec![[0.0; 4]; input_ids.len()];
        Self { tokenizer, input_ids, bbox, labels: Vec::new() }
    }

    fn input(&mut self, ids: &[u32], bbox: [f32; 4]) {
        self.input_ids.extend_from_slice(ids);
        self.bbox.extend(std::iter::repeat_n(bbox, ids.len()));
    }

    fn input_word(&mut self, word: &str, bbox: [f32; 4]) {
        let ids = self.tokenizer.encode_word(word, false);
        self.input(&ids, bbox);
    }

    fn input_words(&mut self, record: &DocumentRecord) {
        for (i, word) in record.words.iter().enumerate() {
            self.input_word(word, record.word_box(i));
        }
    }

    fn target_text(&mut self, text: &str) {
        let ids = self.tokenizer.encode_text(text);
        self.labels.extend(ids);
    }

    fn target_words(&mut self, words: &[String]) {
        for word in words {
            let ids = self.tokenizer.encode_word(word, false);
            self.labels.extend(ids);
        }
    }

    fn target_box(&mut self, bbox: [f32; 4]) {
        let ids = self.tokenizer.box_ids(bbox);
        self.labels.extend(ids);
    }

    fn finish(mut self, record: &DocumentRecord, limits: EncodeLimits) -> DocFeatures {
        self.labels.push(self.tokenizer.eos_token_id());
        self.input_ids.truncate(limits.max_seq_length);
        self.bbox.truncate(limits.max_seq_length);
        self.labels.truncate(limits.max_seq_length_decoder);
        DocFeatures {
            input_ids: self.input_ids,
            bbox: self.bbox,
            labels: self.labels,
            image: record.image.clone(),
        }
    }
}

/// Non-overlapping `[start, end)` word spans covering roughly [`MASK_RATIO`] of the words.
pub fn select_spans(num_words: usize, rng: &mut StdRng) -> Vec<(usize, usize)> {
    if num_words == 0 {
        return Vec::new();
    }
    let mean_span = (1 + MAX_SPAN_WORDS) as f64 / 2.0;
    let start_prob = (MASK_RATIO / mean_span).min(1.0);

    let mut spans = Vec::new();
    let mut i = 0;
    while i < num_words {
        if rng.gen_bool(start_prob) {
            let len = rng.gen_range(1..=MAX_SPAN_WORDS).min(num_words - i);
            spans.push((i, i + len));
            i += len + 1;
        } else {
            i += 1;
        }
    }
    if spans.is_empty() {
        let start = rng.gen_range(0..num_words);
        spans.push((start, start + 1));
    }
    spans
}

/// Encode `record` for `task`. Returns `None` when the record lacks what the task needs.
pub fn encode_record(
    task: Task,
    record: &DocumentRecord,
    tokenizer: &DocTokenizer,
    limits: EncodeLimits,
    rng: &mut StdRng,
) -> Option<DocFeatures> {
    if record.words.is_empty() {
        return None;
    }

    let features = match task {
        Task::LayoutModeling | Task::TextAndLayoutReconstruction | Task::VisualTextRecognition => {
            encode_masked(task, record, tokenizer, limits, rng)
        }
        Task::LayoutAnalysis => {
            if record.regions.is_empty() {
                return None;
            }
            let label = &record.regions[rng.gen_range(0..record.regions.len())].label;
            let mut b = Builder::new(tokenizer, &format!("{} {label}", task.prompt()));
            b.input_words(record);
            for region in record.regions.iter().filter(|r| &r.label == label) {
                b.target_box(region.bbox);
            }
            b.finish(record, limits)
        }
        Task::InformationExtraction => {
            if record.word_labels.is_empty() {
                return None;
            }
            let mut b = Builder::new(tokenizer, task.prompt());
            b.input_words(record);
            for (label, start, end) in entity_runs(&record.word_labels) {
                b.target_text(label);
                b.target_words(&record.words[start..end]);
            }
            b.finish(record, limits)
        }
        Task::QuestionAnswering | Task::DocumentUnderstanding => {
            let question = record.question.as_deref()?;
            let answer = record.answers.first()?;
            let mut b = Builder::new(tokenizer, &format!("{} {question}", task.prompt()));
            b.input_words(record);
            b.target_text(answer);
            b.finish(record, limits)
        }
    };
    Some(features)
}

fn encode_masked(
    task: Task,
    record: &DocumentRecord,
    tokenizer: &DocTokenizer,
    limits: EncodeLimits,
    rng: &mut StdRng,
) -> DocFeatures {
    let spans = select_spans(record.words.len(), rng);
    let mut b = Builder::new(tokenizer, task.prompt());

    let mut word = 0;
    for (k, &(start, end)) in spans.iter().enumerate() {
        for i in word..start {
            b.input_word(&record.words[i], record.word_box(i));
        }

        let sentinel = tokenizer.sentinel_id(k);
        let span_box = union_box((start..end).map(|i| record.word_box(i)));
        let span_words = &record.words[start..end];
        b.input(&[sentinel], [0.0; 4]);
        b.labels.push(sentinel);

        match task {
            Task::LayoutModeling => {
                // Text stays visible, layout is hidden and predicted.
                for word in span_words {
                    b.input_word(word, [0.0; 4]);
                }
                b.target_box(span_box);
            }
            Task::TextAndLayoutReconstruction => {
                b.target_words(span_words);
                b.target_box(span_box);
            }
            _ => {
                // Layout stays visible, text is hidden and predicted.
                b.input(&tokenizer.box_ids(span_box), span_box);
                b.target_words(span_words);
            }
        }
        word = end;
    }
    for i in word..record.words.len() {
        b.input_word(&record.words[i], record.word_box(i));
    }
    b.finish(record, limits)
}

/// Contiguous runs of equal, non-`O` labels as `(label, start, end)`.
fn entity_runs(labels: &[String]) -> Vec<(&str, usize, usize)> {
    let mut runs: Vec<(&str, usize, usize)> = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if label == "O" {
            continue;
        }
        match runs.last_mut() {
            Some((last, _, end)) if *last == label.as_str() && *end == i => *end = i + 1,
            _ => runs.push((label.as_str(), i, i + 1)),
        }
    }
    runs
}
