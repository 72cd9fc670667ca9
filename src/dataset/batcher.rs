//! Batch construction
//!
//! Pads every sequence feature of a group of examples to the group's own
//! maximum length and uploads them as tensors. The one-hot label tensor is
//! only produced for training batches.

use std::ops::Range;
use std::sync::Arc;

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::dataset::corpus::LabelMap;
use crate::dataset::features::RelationExample;
use crate::dataset::vocab::{Vocabulary, UNK_ID};
use crate::utils::error::{RelExtError, Result};

/// Padded tensors for one batch; every 2-D tensor is `[batch, max_len]`
#[derive(Clone, Debug)]
pub struct RelationBatch<B: Backend> {
    pub max_len: usize,
    pub words: Tensor<B, 2, Int>,
    pub words_mask: Tensor<B, 2>,
    pub entity_indicator: Tensor<B, 2, Int>,
    pub arg1_distance: Tensor<B, 2, Int>,
    pub arg2_distance: Tensor<B, 2, Int>,
    pub arg1_context_mask: Tensor<B, 2>,
    pub arg2_context_mask: Tensor<B, 2>,
    pub piece1_mask: Tensor<B, 2>,
    pub piece2_mask: Tensor<B, 2>,
    pub piece3_mask: Tensor<B, 2>,
    /// Head word id of each argument phrase, `[batch, 1]`
    pub arg1_head: Tensor<B, 2, Int>,
    pub arg2_head: Tensor<B, 2, Int>,
    /// One-hot gold labels `[batch, num_labels]`, training batches only
    pub labels: Option<Tensor<B, 2, Int>>,
}

impl<B: Backend> RelationBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.words.dims()[0]
    }

    /// Gold class ids recovered from the one-hot labels
    pub fn targets(&self) -> Option<Tensor<B, 1, Int>> {
        self.labels
            .as_ref()
            .map(|labels| labels.clone().argmax(1).squeeze::<1>(1))
    }
}

/// Builds [`RelationBatch`]es on a fixed device
#[derive(Clone, Debug)]
pub struct RelationBatcher<B: Backend> {
    vocab: Arc<Vocabulary>,
    labels: Arc<LabelMap>,
    device: B::Device,
}

impl<B: Backend> RelationBatcher<B> {
    pub fn new(vocab: Arc<Vocabulary>, labels: Arc<LabelMap>, device: B::Device) -> Self {
        Self {
            vocab,
            labels,
            device,
        }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Pad and tensorize `examples`.
    ///
    /// Fails with [`RelExtError::EmptyBatch`] on no input, and with
    /// [`RelExtError::LabelNotFound`] when `training` and a gold label is
    /// outside the label map.
    pub fn build<'a, I>(&self, examples: I, training: bool) -> Result<RelationBatch<B>>
    where
        I: IntoIterator<Item = &'a RelationExample>,
    {
        let examples: Vec<&RelationExample> = examples.into_iter().collect();
        if examples.is_empty() {
            return Err(RelExtError::EmptyBatch);
        }
        let batch_size = examples.len();
        let max_len = examples.iter().map(|e| e.len()).max().unwrap_or(0);

        let words = self.int_tensor(
            examples.iter().map(|e| {
                e.tokens
                    .iter()
                    .map(|token| self.vocab.id(token) as i64)
                    .collect::<Vec<_>>()
            }),
            max_len,
        );
        let entity_indicator = self.int_tensor(
            examples
                .iter()
                .map(|e| e.entity_indicator.iter().map(|&v| v as i64).collect()),
            max_len,
        );
        let arg1_distance = self.int_tensor(
            examples
                .iter()
                .map(|e| e.arg1_distance.iter().map(|&v| v as i64).collect()),
            max_len,
        );
        let arg2_distance = self.int_tensor(
            examples
                .iter()
                .map(|e| e.arg2_distance.iter().map(|&v| v as i64).collect()),
            max_len,
        );

        let arg1_head = self.int_tensor(
            examples.iter().map(|e| vec![self.head_word_id(&e.arg1)]),
            1,
        );
        let arg2_head = self.int_tensor(
            examples.iter().map(|e| vec![self.head_word_id(&e.arg2)]),
            1,
        );

        let labels = if training {
            let num_labels = self.labels.len();
            let mut one_hot = vec![0i64; batch_size * num_labels];
            for (row, example) in examples.iter().enumerate() {
                let id = self.labels.id(&example.relation)?;
                one_hot[row * num_labels + id] = 1;
            }
            Some(Tensor::<B, 2, Int>::from_data(
                TensorData::new(one_hot, [batch_size, num_labels]),
                &self.device,
            ))
        } else {
            None
        };

        Ok(RelationBatch {
            max_len,
            words,
            words_mask: self.mask_tensor(examples.iter().map(|e| &e.words_mask), max_len),
            entity_indicator,
            arg1_distance,
            arg2_distance,
            arg1_context_mask: self
                .mask_tensor(examples.iter().map(|e| &e.arg1_context_mask), max_len),
            arg2_context_mask: self
                .mask_tensor(examples.iter().map(|e| &e.arg2_context_mask), max_len),
            piece1_mask: self.mask_tensor(examples.iter().map(|e| &e.piece1_mask), max_len),
            piece2_mask: self.mask_tensor(examples.iter().map(|e| &e.piece2_mask), max_len),
            piece3_mask: self.mask_tensor(examples.iter().map(|e| &e.piece3_mask), max_len),
            arg1_head,
            arg2_head,
            labels,
        })
    }

    /// Last token of the argument phrase
    fn head_word_id(&self, phrase: &str) -> i64 {
        phrase
            .split_whitespace()
            .last()
            .map(|word| self.vocab.id(word))
            .unwrap_or(UNK_ID) as i64
    }

    fn int_tensor<I>(&self, rows: I, width: usize) -> Tensor<B, 2, Int>
    where
        I: Iterator<Item = Vec<i64>>,
    {
        let mut data = Vec::new();
        let mut count = 0;
        for row in rows {
            data.extend(pad_row(&row, width, 0));
            count += 1;
        }
        Tensor::<B, 2, Int>::from_data(TensorData::new(data, [count, width]), &self.device)
    }

    fn mask_tensor<'a, I>(&self, rows: I, width: usize) -> Tensor<B, 2>
    where
        I: Iterator<Item = &'a Vec<u8>>,
    {
        let mut data = Vec::new();
        let mut count = 0;
        for row in rows {
            let row: Vec<f32> = row.iter().map(|&v| v as f32).collect();
            data.extend(pad_row(&row, width, 0.0));
            count += 1;
        }
        Tensor::<B, 2>::from_data(TensorData::new(data, [count, width]), &self.device)
    }
}

fn pad_row<T: Copy>(row: &[T], width: usize, pad: T) -> Vec<T> {
    let mut padded = row.to_vec();
    padded.resize(width, pad);
    padded
}

/// Split `n` items into consecutive batches of `batch_size`.
///
/// A trailing batch of exactly one item is folded into the previous batch,
/// so `n % batch_size == 1` yields `ceil(n / batch_size) - 1` batches with a
/// final batch of `batch_size + 1`.
pub fn batch_ranges(n: usize, batch_size: usize) -> Vec<Range<usize>> {
    if n == 0 || batch_size == 0 {
        return Vec::new();
    }
    let mut count = n.div_ceil(batch_size);
    if count > 1 && n - batch_size * (count - 1) == 1 {
        count -= 1;
    }
    (0..count)
        .map(|i| {
            let start = i * batch_size;
            let end = if i + 1 == count { n } else { start + batch_size };
            start..end
        })
        .collect()
}
