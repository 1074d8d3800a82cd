//! Batching and padding of tokenized document features.

use crate::dataset::DocFeatures;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Label value ignored by the loss.
pub const IGNORE_INDEX: i64 = -100;

/// How sequences in a batch are padded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// Pad to the longest sequence in the batch (capped at the maximum).
    #[default]
    Longest,
    /// Pad every sequence to exactly the maximum length.
    MaxLength,
}

impl std::fmt::Display for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Longest => f.write_str("longest"),
            Self::MaxLength => f.write_str("max_length"),
        }
    }
}

impl Padding {
    fn target_len(self, longest: usize, max: usize) -> usize {
        match self {
            Self::Longest => longest.min(max),
            Self::MaxLength => max,
        }
    }
}

/// A padded batch, row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub bbox: Vec<Vec<[f32; 4]>>,
    pub labels: Vec<Vec<i64>>,
    pub decoder_attention_mask: Vec<Vec<u8>>,
    pub images: Vec<Option<PathBuf>>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Label token ids that take part in the loss.
    pub fn target_tokens(&self) -> impl Iterator<Item = u32> + '_ {
        self.labels
            .iter()
            .flatten()
            .filter(|&&label| label != IGNORE_INDEX)
            .map(|&label| label as u32)
    }
}

#[derive(Debug, Clone)]
pub struct DataCollator {
    pub padding: Padding,
    pub max_length: usize,
    pub max_length_decoder: usize,
    pub pad_token_id: u32,
}

impl DataCollator {
    #[must_use]
    pub fn new(
        padding: Padding,
        max_length: usize,
        max_length_decoder: usize,
        pad_token_id: u32,
    ) -> Self {
        Self { padding, max_length, max_length_decoder, pad_token_id }
    }

    #[must_use]
    pub fn collate(&self, features: &[DocFeatures]) -> Batch {
        let longest_input = features.iter().map(|f| f.input_ids.len()).max().unwrap_or(0);
        let longest_label = features.iter().map(|f| f.labels.len()).max().unwrap_or(0);
        let input_len = self.padding.target_len(longest_input, self.max_length);
        let label_len = self.padding.target_len(longest_label, self.max_length_decoder);

        let mut batch = Batch::default();
        for feature in features {
            let kept = feature.input_ids.len().min(input_len);

            let mut ids = feature.input_ids[..kept].to_vec();
            ids.resize(input_len, self.pad_token_id);

            let mut mask = vec![1u8; kept];
            mask.resize(input_len, 0);

            let mut boxes: Vec<[f32; 4]> = feature.bbox.iter().copied().take(kept).collect();
            boxes.resize(input_len, [0.0; 4]);

            let kept_labels = feature.labels.len().min(label_len);
            let mut labels: Vec<i64> =
                feature.labels[..kept_labels].iter().map(|&l| i64::from(l)).collect();
            labels.resize(label_len, IGNORE_INDEX);

            let mut decoder_mask = vec![1u8; kept_labels];
            decoder_mask.resize(label_len, 0);

            batch.input_ids.push(ids);
            batch.attention_mask.push(mask);
            batch.bbox.push(boxes);
            batch.labels.push(labels);
            batch.decoder_attention_mask.push(decoder_mask);
            batch.images.push(feature.image.clone());
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(inputs: usize, labels: usize) -> DocFeatures {
        DocFeatures {
            input_ids: (10..10 + inputs as u32).collect(),
            bbox: vec![[0.1, 0.2, 0.3, 0.4]; inputs],
            labels: (20..20 + labels as u32).collect(),
            image: None,
        }
    }

    #[test]
    fn test_longest_padding_pads_to_batch_maximum() {
        let collator = DataCollator::new(Padding::Longest, 16, 16, 0);
        let batch = collator.collate(&[feature(3, 2), feature(5, 4)]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.input_ids[0], vec![10, 11, 12, 0, 0]);
        assert_eq!(batch.attention_mask[0], vec![1, 1, 1, 0, 0]);
        assert_eq!(batch.bbox[0][4], [0.0; 4]);
        assert_eq!(batch.labels[0], vec![20, 21, IGNORE_INDEX, IGNORE_INDEX]);
        assert_eq!(batch.decoder_attention_mask[0], vec![1, 1, 0, 0]);
        assert_eq!(batch.input_ids[1].len(), 5);
    }

    #[test]
    fn test_max_length_padding_and_truncation() {
        let collator = DataCollator::new(Padding::MaxLength, 4, 3, 1);
        let batch = collator.collate(&[feature(2, 1), feature(6, 5)]);

        assert_eq!(batch.input_ids[0], vec![10, 11, 1, 1]);
        assert_eq!(batch.input_ids[1], vec![10, 11, 12, 13]);
        assert_eq!(batch.attention_mask[1], vec![1, 1, 1, 1]);
        assert_eq!(batch.labels[0], vec![20, IGNORE_INDEX, IGNORE_INDEX]);
        assert_eq!(batch.labels[1], vec![20, 21, 22]);
    }

    #[test]
    fn test_target_tokens_skip_ignored_labels() {
        let collator = DataCollator::new(Padding::Longest, 8, 8, 0);
        let batch = collator.collate(&[feature(1, 1), feature(1, 3)]);
        let targets: Vec<u32> = batch.target_tokens().collect();
        assert_eq!(targets, vec![20, 20, 21, 22]);
    }

    #[test]
    fn test_padding_display_names() {
        assert_eq!(Padding::Longest.to_string(), "longest");
        assert_eq!(Padding::MaxLength.to_string(), "max_length");
    }
}
