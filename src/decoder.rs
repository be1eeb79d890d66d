//! Attention Decoder
//!
//! Produces one word distribution per call. A step runs:
//!
//! ```text
//! tokens [B] ──► embedding ──────────────┐
//!                                        ├─► concat [B, E+H] ──► LSTM stack ──► fc_out ──► logits [B, V]
//! state.h[top] ──► attention(enc) ──► context [B, H]
//! ```
//!
//! The query for attention is the top layer's hidden state *before* the step.
//! Encoder outputs follow the attention call shapes: one source per row, or a
//! single shared source for every row.

use crate::context::ExecutionContext;
use crate::layers::attention::{AttentionCache, AttentionParamGrads, TrainableAttention};
use crate::layers::embedding::TrainableEmbedding;
use crate::layers::linear::{LinearCache, LinearParamGrads, TrainableLinear};
use crate::layers::lstm::{LstmGrads, LstmState, LstmStepCache, TrainableLstm};
use crate::tensor::Tensor;

/// Decoder parameters
#[derive(Clone, Debug)]
pub struct TrainableDecoder {
    pub embedding: TrainableEmbedding,
    pub attention: TrainableAttention,
    pub lstm: TrainableLstm,
    pub fc_out: TrainableLinear,
}

/// Cache of one decoder step
pub struct DecoderStepCache {
    tokens: Vec<usize>,
    attention: AttentionCache,
    lstm: LstmStepCache,
    fc_out: LinearCache,
    /// Attention weights `[B, T]`
    pub weights: Tensor,
}

/// Decoder parameter gradients, summed over all steps of a batch
#[derive(Clone, Debug)]
pub struct DecoderGradients {
    pub embedding: Tensor,
    pub attention: AttentionParamGrads,
    pub lstm: LstmGrads,
    pub fc_out: LinearParamGrads,
}

impl TrainableDecoder {
    pub fn new(
        vocab_size: usize,
        embedding_dim: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f32,
        seed: u64,
    ) -> Self {
        Self {
            embedding: TrainableEmbedding::new(vocab_size, embedding_dim, seed),
            attention: TrainableAttention::new(hidden_size, seed.wrapping_add(100)),
            lstm: TrainableLstm::new(
                embedding_dim + hidden_size,
                hidden_size,
                num_layers,
                dropout,
                seed.wrapping_add(200),
            ),
            fc_out: TrainableLinear::new(hidden_size, vocab_size, seed.wrapping_add(300)),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.fc_out.out_features()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding.dim()
    }

    pub fn hidden_size(&self) -> usize {
        self.lstm.hidden_size()
    }

    /// One decoding step
    ///
    /// # Arguments
    ///
    /// * `tokens` - Previous token per row `[B]`
    /// * `state` - Decoder state, each layer `[B, H]`
    /// * `encoder_outputs` - `[B, T, H]` or `[1, T, H]`
    ///
    /// # Returns
    ///
    /// `(logits [B, V], new state, cache)`
    pub fn step(
        &self,
        tokens: &[usize],
        state: &LstmState,
        encoder_outputs: &Tensor,
        ctx: &mut ExecutionContext,
    ) -> (Tensor, LstmState, DecoderStepCache) {
        assert_eq!(
            tokens.len(),
            state.batch_size(),
            "{} tokens for a decoder state of {} rows",
            tokens.len(),
            state.batch_size()
        );

        let embedded = self.embedding.forward(tokens);
        let (context, weights, attention) = self.attention.forward(state.top(), encoder_outputs);
        let input = embedded.concat_cols(&context);

        let (out, next, lstm) = self.lstm.step(&input, state, ctx);
        let (logits, fc_out) = self.fc_out.forward(&out);

        let cache = DecoderStepCache {
            tokens: tokens.to_vec(),
            attention,
            lstm,
            fc_out,
            weights,
        };
        (logits, next, cache)
    }

    /// Backward through one step
    ///
    /// `d_logits` is the loss gradient on this step's logits and `d_state` the
    /// gradient arriving on the step's output state. Parameter gradients are
    /// added to `grads`. Returns the gradient for the step's input state and
    /// for the encoder outputs.
    pub fn backward_step(
        &self,
        d_logits: &Tensor,
        d_state: &LstmState,
        cache: &DecoderStepCache,
        grads: &mut DecoderGradients,
    ) -> (LstmState, Tensor) {
        let fc = self.fc_out.backward(d_logits, &cache.fc_out);
        grads.fc_out.accumulate(&fc);

        let (d_input, mut d_prev) = self.lstm.step_backward(&fc.x, d_state, &cache.lstm, &mut grads.lstm);

        let e = self.embedding_dim();
        let d_embedded = d_input.narrow_cols(0, e);
        let d_context = d_input.narrow_cols(e, self.hidden_size());
        self.embedding
            .backward(&d_embedded, &cache.tokens, &mut grads.embedding);

        let attention = self.attention.backward(&d_context, &cache.attention);
        grads.attention.accumulate(&attention);
        let top = d_prev.num_layers() - 1;
        d_prev.h[top].add_assign(&attention.hidden);

        (d_prev, attention.encoder_outputs)
    }

    /// Parameters in checkpoint and optimizer order
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.embedding.weight];
        params.extend(self.attention.parameters());
        params.extend(self.lstm.parameters());
        params.extend(self.fc_out.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.embedding.weight];
        params.extend(self.attention.parameters_mut());
        params.extend(self.lstm.parameters_mut());
        params.extend(self.fc_out.parameters_mut());
        params
    }
}

impl DecoderGradients {
    pub fn zeros_like(decoder: &TrainableDecoder) -> Self {
        Self {
            embedding: Tensor::zeros(decoder.embedding.weight.shape.clone()),
            attention: AttentionParamGrads::zeros_like(&decoder.attention),
            lstm: LstmGrads::zeros_like(&decoder.lstm),
            fc_out: LinearParamGrads::zeros_like(&decoder.fc_out),
        }
    }

    /// Same order as [`TrainableDecoder::parameters`]
    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = vec![&self.embedding];
        out.extend(self.attention.tensors());
        out.extend(self.lstm.tensors());
        out.extend(self.fc_out.tensors());
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = vec![&mut self.embedding];
        out.extend(self.attention.tensors_mut());
        out.extend(self.lstm.tensors_mut());
        out.extend(self.fc_out.tensors_mut());
        out
    }
}
