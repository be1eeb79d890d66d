//! Model and training configuration
//!
//! [`ModelConfig`] fixes the architecture and is stored inside every checkpoint,
//! so a saved model can be rebuilt without any command line flags.
//! [`TrainConfig`] holds the optimization and evaluation knobs.
//!
//! ```rust
//! use vidcap::ModelConfig;
//!
//! let config = ModelConfig::tiny(50);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.vocab_size, 50);
//! ```

use crate::beam::BeamConfig;
use crate::error::{CaptionError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Architecture hyperparameters
///
/// Encoder and decoder share `hidden_size` and `num_layers` because the
/// decoder starts from the encoder's final state.
///
/// # Parameter Count
///
/// ```text
/// lstm(in, h)  = 4h × (in + h + 2)
/// encoder      = lstm(input_size, h) + (num_layers - 1) × lstm(h, h)
/// decoder      = vocab × emb + lstm(emb + h, h) + (num_layers - 1) × lstm(h, h)
///              + 2h × h + h + h          (attention)
///              + h × vocab + vocab       (output projection)
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub input_size: usize,
    pub hidden_size: usize,
    pub embedding_dim: usize,
    pub num_layers: usize,
    pub dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 4,       // Reserved tokens only until a vocabulary is built
            input_size: 4096,    // Per-frame CNN features
            hidden_size: 512,    // Encoder and decoder LSTM width
            embedding_dim: 300,  // Word embedding width
            num_layers: 1,       // Stacked LSTM depth
            dropout: 0.3,        // Between stacked layers only
        }
    }
}

impl ModelConfig {
    /// A very small architecture for tests and smoke runs
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            input_size: 8,
            hidden_size: 6,
            embedding_dim: 5,
            num_layers: 1,
            dropout: 0.0,
        }
    }

    /// Check that every dimension is usable
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size < 4 {
            return Err(CaptionError::InvalidConfig(format!(
                "vocab_size must cover the 4 reserved tokens, got {}",
                self.vocab_size
            )));
        }
        if self.input_size == 0 || self.hidden_size == 0 || self.embedding_dim == 0 {
            return Err(CaptionError::InvalidConfig(
                "input_size, hidden_size and embedding_dim must be positive".into(),
            ));
        }
        if self.num_layers == 0 {
            return Err(CaptionError::InvalidConfig("num_layers must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(CaptionError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Total number of trainable scalars in encoder plus decoder
    pub fn num_parameters(&self) -> usize {
        let lstm = |input: usize, h: usize| 4 * h * (input + h + 2);
        let h = self.hidden_size;
        let stacked = (self.num_layers - 1) * lstm(h, h);
        let encoder = lstm(self.input_size, h) + stacked;
        let decoder = self.vocab_size * self.embedding_dim
            + lstm(self.embedding_dim + h, h)
            + stacked
            + 2 * h * h
            + h
            + h
            + h * self.vocab_size
            + self.vocab_size;
        encoder + decoder
    }
}

/// Which split the per-epoch validation score is computed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSplit {
    /// Score on the training examples
    Train,
    /// Score on the held-out test examples
    Test,
}

/// Optimization, decoding and bookkeeping settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of passes through the training set
    pub epochs: usize,
    /// Examples per batch
    pub batch_size: usize,
    /// Adam step size
    pub learning_rate: f32,
    /// Probability of feeding the ground-truth token at each decoder step
    pub teacher_forcing_ratio: f32,
    /// Hypotheses kept during beam search
    pub beam_width: usize,
    /// Maximum decoding steps
    pub max_len: usize,
    /// Words seen fewer times than this become `<UNK>`
    pub min_word_count: usize,
    /// Exponent of the length normalization in beam ranking (0 disables it)
    pub length_penalty: f32,
    /// Exclude `<PAD>` targets from loss and gradient
    pub mask_padding: bool,
    /// Wrap training captions in `<SOS>` ... `<EOS>`
    pub add_boundary_tokens: bool,
    /// Clip the global gradient norm to this value
    pub grad_clip: Option<f32>,
    /// Decoupled weight decay on 2D weights
    pub weight_decay: f32,
    /// Split used for the per-epoch score
    pub validation: ValidationSplit,
    /// Where the best encoder, decoder and vocabulary are written
    pub checkpoint_dir: PathBuf,
    /// Optional per-epoch CSV metrics file
    pub log_file: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            batch_size: 32,
            learning_rate: 1e-3,
            teacher_forcing_ratio: 0.5,
            beam_width: 3,
            max_len: 28,
            min_word_count: 3,
            length_penalty: 0.0,
            mask_padding: false,
            add_boundary_tokens: false,
            grad_clip: None,
            weight_decay: 0.0,
            validation: ValidationSplit::Train,
            checkpoint_dir: PathBuf::from("best_model"),
            log_file: None,
        }
    }
}

impl TrainConfig {
    /// Beam settings for validation and caption output
    pub fn beam(&self) -> BeamConfig {
        BeamConfig {
            beam_width: self.beam_width,
            max_len: self.max_len,
            length_penalty: self.length_penalty,
        }
    }

    /// Check ranges of the numeric settings
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(CaptionError::InvalidConfig("batch_size must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(CaptionError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.teacher_forcing_ratio) {
            return Err(CaptionError::InvalidConfig(format!(
                "teacher_forcing_ratio must be in [0, 1], got {}",
                self.teacher_forcing_ratio
            )));
        }
        if self.max_len == 0 {
            return Err(CaptionError::InvalidConfig("max_len must be at least 1".into()));
        }
        if let Some(clip) = self.grad_clip {
            if !(clip > 0.0) {
                return Err(CaptionError::InvalidConfig(format!(
                    "grad_clip must be positive, got {}",
                    clip
                )));
            }
        }
        if self.weight_decay < 0.0 || self.length_penalty < 0.0 {
            return Err(CaptionError::InvalidConfig(
                "weight_decay and length_penalty must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_run() {
        let model = ModelConfig::default();
        assert_eq!(model.input_size, 4096);
        assert_eq!(model.hidden_size, 512);
        assert_eq!(model.embedding_dim, 300);

        let train = TrainConfig::default();
        assert_eq!(train.epochs, 200);
        assert_eq!(train.batch_size, 32);
        assert_eq!(train.beam_width, 3);
        assert_eq!(train.max_len, 28);
        assert_eq!(train.min_word_count, 3);
        assert!(!train.mask_padding);
        assert!(train.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut model = ModelConfig::tiny(10);
        model.num_layers = 0;
        assert!(model.validate().is_err());

        let train = TrainConfig {
            teacher_forcing_ratio: 1.5,
            ..TrainConfig::default()
        };
        assert!(train.validate().is_err());
    }

    #[test]
    fn test_parameter_count_single_layer() {
        let config = ModelConfig {
            vocab_size: 4,
            input_size: 2,
            hidden_size: 1,
            embedding_dim: 1,
            num_layers: 1,
            dropout: 0.0,
        };
        // encoder 4*(2+1+2)=20, embedding 4, decoder lstm 4*(2+1+2)=20,
        // attention 2+1+1=4, projection 4+4=8
        assert_eq!(config.num_parameters(), 56);
    }
}
