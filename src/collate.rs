//! Batch Collation
//!
//! Stacks per-video feature matrices into one `[N, T, input_size]` tensor and
//! right-pads the captions with `<PAD>` to the longest caption in the batch.
//!
//! ```text
//! captions            padded [N, L]
//! [4, 5, 6]        →  [4, 5, 6, 0, 0]
//! [4, 7, 8, 9, 5]     [4, 7, 8, 9, 5]
//! ```

use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;
use crate::vocab::PAD;

/// One training or evaluation example
#[derive(Clone, Debug)]
pub struct Example {
    pub video_id: String,
    /// `[T, input_size]`
    pub features: Tensor,
    /// Encoded reference caption
    pub caption: Vec<usize>,
}

/// A collated batch
#[derive(Clone, Debug)]
pub struct Batch {
    /// `[N, T, input_size]`
    pub features: Tensor,
    /// Captions padded to a common length, one row per example
    pub captions: Vec<Vec<usize>>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.captions.len()
    }

    /// Padded caption length `L`
    pub fn caption_len(&self) -> usize {
        self.captions.first().map_or(0, Vec::len)
    }

    /// Column `t` of the padded captions, one token per example
    pub fn tokens_at(&self, t: usize) -> Vec<usize> {
        self.captions.iter().map(|c| c[t]).collect()
    }
}

/// Collate examples into a batch
///
/// # Errors
///
/// - [`CaptionError::InvalidConfig`] for an empty slice
/// - [`CaptionError::RaggedBatch`] when frame counts or feature widths differ
pub fn collate(examples: &[&Example]) -> Result<Batch> {
    let first = examples
        .first()
        .ok_or_else(|| CaptionError::InvalidConfig("cannot collate an empty batch".into()))?;
    let (time, width) = (first.features.shape[0], first.features.shape[1]);

    let mut data = Vec::with_capacity(examples.len() * time * width);
    for ex in examples {
        if ex.features.shape[0] != time {
            return Err(CaptionError::RaggedBatch {
                video_id: ex.video_id.clone(),
                expected: time,
                actual: ex.features.shape[0],
            });
        }
        if ex.features.shape[1] != width {
            return Err(CaptionError::FeatureDimension {
                video_id: ex.video_id.clone(),
                expected: width,
                actual: ex.features.shape[1],
            });
        }
        data.extend_from_slice(&ex.features.data);
    }

    let max_len = examples.iter().map(|e| e.caption.len()).max().unwrap_or(0);
    let captions = examples
        .iter()
        .map(|e| {
            let mut padded = e.caption.clone();
            padded.resize(max_len, PAD);
            padded
        })
        .collect();

    Ok(Batch {
        features: Tensor::new(data, vec![examples.len(), time, width]),
        captions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(id: &str, frames: usize, caption_len: usize) -> Example {
        Example {
            video_id: id.to_string(),
            features: Tensor::new(vec![id.len() as f32; frames * 2], vec![frames, 2]),
            caption: (0..caption_len).map(|i| 4 + i).collect(),
        }
    }

    #[test]
    fn test_pads_to_longest_caption() {
        let a = example("a", 3, 3);
        let b = example("bb", 3, 7);
        let c = example("ccc", 3, 5);
        let batch = collate(&[&a, &b, &c]).unwrap();

        assert_eq!(batch.size(), 3);
        assert_eq!(batch.caption_len(), 7);
        assert_eq!(batch.captions[0], vec![4, 5, 6, PAD, PAD, PAD, PAD]);
        assert_eq!(batch.captions[2][5..], [PAD, PAD]);
        assert_eq!(batch.tokens_at(4), vec![PAD, 8, 8]);
        assert_eq!(batch.features.shape, vec![3, 3, 2]);
        assert_eq!(batch.features.batch_item(2).data, vec![3.0; 6]);
        assert_eq!(batch.captions[1], (4..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_ragged_frames_rejected() {
        let a = example("a", 3, 2);
        let b = example("b", 4, 2);
        assert!(matches!(
            collate(&[&a, &b]),
            Err(CaptionError::RaggedBatch { expected: 3, actual: 4, .. })
        ));
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(collate(&[]).is_err());
    }
}
