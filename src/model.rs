//! Sequence-to-Sequence Captioning Model
//!
//! Pairs a [`TrainableEncoder`] and a [`TrainableDecoder`] that share hidden
//! width and depth, so the encoder's final state can seed the decoder.
//!
//! ## Architecture
//!
//! ```text
//! video features [N, T, 4096]
//!       │
//!       ▼
//! Encoder LSTM ─────────► encoder outputs [N, T, H] ──┐
//!       │                                             │ attention
//!       ▼ final (h, c)                                ▼
//! Decoder: <SOS> → embed ⊕ context → LSTM → logits → next word → ...
//! ```
//!
//! ## Parameter Order
//!
//! [`Seq2Seq::parameters`] lists encoder tensors, then decoder tensors, in a
//! fixed order. [`Seq2SeqGradients::tensors`] follows the same order, and both
//! the optimizer state and the checkpoint format rely on it.
//!
//! ## Example
//!
//! ```rust
//! use vidcap::{ExecutionContext, ModelConfig, Seq2Seq, Tensor};
//! use vidcap::beam::BeamConfig;
//!
//! let config = ModelConfig::tiny(12);
//! let model = Seq2Seq::new(&config, 42);
//! let mut ctx = ExecutionContext::new(0);
//!
//! let video = Tensor::zeros(vec![1, 5, config.input_size]);
//! let tokens = model.caption(&video, &BeamConfig::default(), &mut ctx);
//! assert_eq!(tokens[0], vidcap::vocab::SOS);
//! assert!(tokens.len() <= 29);
//! ```

use crate::beam::{caption_source, BeamConfig};
use crate::config::ModelConfig;
use crate::context::ExecutionContext;
use crate::decoder::{DecoderGradients, TrainableDecoder};
use crate::encoder::TrainableEncoder;
use crate::layers::lstm::LstmGrads;
use crate::tensor::Tensor;

/// Encoder plus decoder
#[derive(Clone, Debug)]
pub struct Seq2Seq {
    pub config: ModelConfig,
    pub encoder: TrainableEncoder,
    pub decoder: TrainableDecoder,
}

/// Gradients for every parameter of a [`Seq2Seq`]
#[derive(Clone, Debug)]
pub struct Seq2SeqGradients {
    pub encoder: LstmGrads,
    pub decoder: DecoderGradients,
}

impl Seq2Seq {
    /// Build a freshly initialized model
    pub fn new(config: &ModelConfig, seed: u64) -> Self {
        Self {
            config: config.clone(),
            encoder: TrainableEncoder::new(
                config.input_size,
                config.hidden_size,
                config.num_layers,
                config.dropout,
                seed,
            ),
            decoder: TrainableDecoder::new(
                config.vocab_size,
                config.embedding_dim,
                config.hidden_size,
                config.num_layers,
                config.dropout,
                seed.wrapping_add(1000),
            ),
        }
    }

    /// Beam search caption for every video in `features [N, T, input_size]`
    pub fn caption_batch(
        &self,
        features: &Tensor,
        beam: &BeamConfig,
        ctx: &mut ExecutionContext,
    ) -> Vec<Vec<usize>> {
        let (encoded, _) = self.encoder.forward(features, ctx);
        (0..encoded.batch_size())
            .map(|i| caption_source(&self.decoder, encoded.source(i), beam, ctx))
            .collect()
    }

    /// Beam search caption for a single video `[1, T, input_size]`
    pub fn caption(&self, features: &Tensor, beam: &BeamConfig, ctx: &mut ExecutionContext) -> Vec<usize> {
        self.caption_batch(features, beam, ctx).swap_remove(0)
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.encoder.parameters_mut();
        params.extend(self.decoder.parameters_mut());
        params
    }

    /// Total trainable scalars
    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.data.len()).sum()
    }
}

impl Seq2SeqGradients {
    pub fn zeros_like(model: &Seq2Seq) -> Self {
        Self {
            encoder: LstmGrads::zeros_like(&model.encoder.lstm),
            decoder: DecoderGradients::zeros_like(&model.decoder),
        }
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = self.encoder.tensors();
        out.extend(self.decoder.tensors());
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = self.encoder.tensors_mut();
        out.extend(self.decoder.tensors_mut());
        out
    }
}
