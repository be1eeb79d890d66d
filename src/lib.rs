//! vidcap: Video Captioning from Scratch
//!
//! A sequence-to-sequence captioner implemented from scratch in Rust. An LSTM
//! encoder reads per-frame CNN features, an LSTM decoder with additive
//! attention writes the caption one word at a time, and beam search picks the
//! final sentence. Training uses teacher forcing and is validated with BLEU-1.
//!
//! # Modules
//!
//! - [`tensor`] - Row-major tensors with parallel kernels
//! - [`layers`] - Linear, embedding, dropout, LSTM and attention layers
//! - [`vocab`] - Word vocabulary with reserved `<PAD> <SOS> <EOS> <UNK>`
//! - [`encoder`] / [`decoder`] / [`model`] - The seq2seq network
//! - [`beam`] - Beam search and greedy decoding
//! - [`dataset`] / [`collate`] - Caption files, `.npy` features and batching
//! - [`trainer`] - Teacher-forced training, validation and caption output
//! - [`checkpoint`] - Saving and loading the best model
//!
//! # Example
//!
//! ```rust
//! use vidcap::beam::BeamConfig;
//! use vidcap::{ExecutionContext, ModelConfig, Seq2Seq, Tensor, Vocabulary};
//!
//! let vocab = Vocabulary::build(["a man is cooking", "a cat is sleeping"], 1);
//! let model = Seq2Seq::new(&ModelConfig::tiny(vocab.len()), 42);
//! let mut ctx = ExecutionContext::new(0);
//!
//! let video = Tensor::zeros(vec![1, 4, model.config.input_size]);
//! let tokens = model.caption(&video, &BeamConfig::default(), &mut ctx);
//! let caption = vocab.caption_text(&tokens);
//! assert!(caption.split_whitespace().count() <= 28);
//! ```

pub mod beam;
pub mod bleu;
pub mod checkpoint;
pub mod collate;
pub mod config;
pub mod context;
pub mod dataset;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod gradients;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod tensor;
pub mod trainer;
pub mod training_logger;
pub mod vocab;

// Re-export main types for convenience
pub use bleu::{Bleu1, CaptionScorer};
pub use config::{ModelConfig, TrainConfig};
pub use context::ExecutionContext;
pub use error::{CaptionError, Result};
pub use model::Seq2Seq;
pub use tensor::Tensor;
pub use trainer::Trainer;
pub use training_logger::TrainingLogger;
pub use vocab::Vocabulary;
