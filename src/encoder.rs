//! Video Encoder
//!
//! A stacked LSTM run over the per-frame feature sequence of every video in a
//! batch, starting from a zero state.
//!
//! ```text
//! features [N, T, input_size]
//!     │  (t = 0 .. T-1)
//!     ▼
//! LSTM stack ──► outputs [N, T, H]   (top layer at every timestep)
//!     └────────► final state          (per-layer h and c, each [N, H])
//! ```
//!
//! The final state seeds the decoder; the outputs are what attention reads.

use crate::context::ExecutionContext;
use crate::layers::lstm::{LstmGrads, LstmState, LstmStepCache, TrainableLstm};
use crate::tensor::Tensor;

/// Encoder parameters
#[derive(Clone, Debug)]
pub struct TrainableEncoder {
    pub lstm: TrainableLstm,
}

/// Result of encoding a batch
#[derive(Clone, Debug)]
pub struct EncoderOutput {
    /// Top-layer output at every timestep `[N, T, H]`
    pub outputs: Tensor,
    /// State after the last timestep
    pub state: LstmState,
}

impl EncoderOutput {
    /// Number of encoded videos
    pub fn batch_size(&self) -> usize {
        self.outputs.shape[0]
    }

    /// View of source `i` alone: outputs `[1, T, H]` and the matching state rows
    pub fn source(&self, i: usize) -> EncoderOutput {
        EncoderOutput {
            outputs: self.outputs.batch_item(i),
            state: self.state.row(i),
        }
    }
}

/// Per-timestep caches for backpropagation through time
pub struct EncoderCache {
    steps: Vec<LstmStepCache>,
}

impl TrainableEncoder {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f32,
        seed: u64,
    ) -> Self {
        Self {
            lstm: TrainableLstm::new(input_size, hidden_size, num_layers, dropout, seed),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.lstm.hidden_size()
    }

    /// Encode `features [N, T, input_size]`
    ///
    /// # Panics
    ///
    /// Panics if the feature width differs from the LSTM input size.
    pub fn forward(
        &self,
        features: &Tensor,
        ctx: &mut ExecutionContext,
    ) -> (EncoderOutput, EncoderCache) {
        assert_eq!(
            features.shape.len(),
            3,
            "features must be [batch, time, input], got {:?}",
            features.shape
        );
        assert_eq!(
            features.shape[2],
            self.lstm.input_size(),
            "feature width {} does not match encoder input size {}",
            features.shape[2],
            self.lstm.input_size()
        );
        let (batch, time) = (features.shape[0], features.shape[1]);

        let mut state = self.lstm.zero_state(batch);
        let mut outputs = Vec::with_capacity(time);
        let mut steps = Vec::with_capacity(time);
        for t in 0..time {
            let (out, next, cache) = self.lstm.step(&features.time_step(t), &state, ctx);
            outputs.push(out);
            steps.push(cache);
            state = next;
        }

        let outputs = if time == 0 {
            Tensor::zeros(vec![batch, 0, self.hidden_size()])
        } else {
            Tensor::from_time_steps(&outputs)
        };
        (EncoderOutput { outputs, state }, EncoderCache { steps })
    }

    /// Backpropagation through time
    ///
    /// `d_outputs` matches [`EncoderOutput::outputs`] and `d_final` the final
    /// state. Input features are not trainable, so only parameter gradients
    /// are returned.
    pub fn backward(&self, d_outputs: &Tensor, d_final: &LstmState, cache: &EncoderCache) -> LstmGrads {
        let mut grads = LstmGrads::zeros_like(&self.lstm);
        let mut d_state = d_final.clone();
        for t in (0..cache.steps.len()).rev() {
            let (_, d_prev) =
                self.lstm
                    .step_backward(&d_outputs.time_step(t), &d_state, &cache.steps[t], &mut grads);
            d_state = d_prev;
        }
        grads
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        self.lstm.parameters()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.lstm.parameters_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::linear::random_init;

    #[test]
    fn test_output_shapes() {
        let encoder = TrainableEncoder::new(4, 3, 2, 0.3, 1);
        let mut ctx = ExecutionContext::new(0);
        let features = Tensor::new(random_init(2 * 5 * 4, 2, 1.0), vec![2, 5, 4]);
        let (out, _) = encoder.forward(&features, &mut ctx);
        assert_eq!(out.outputs.shape, vec![2, 5, 3]);
        assert_eq!(out.state.num_layers(), 2);
        assert_eq!(out.state.h[1].shape, vec![2, 3]);
        // Top output at the last step is the top hidden state.
        assert_eq!(out.outputs.time_step(4), out.state.h[1]);
    }

    #[test]
    fn test_batch_rows_are_independent() {
        let encoder = TrainableEncoder::new(4, 3, 1, 0.0, 1);
        let mut ctx = ExecutionContext::new(0);
        let features = Tensor::new(random_init(2 * 3 * 4, 9, 1.0), vec![2, 3, 4]);
        let (both, _) = encoder.forward(&features, &mut ctx);
        let (second, _) = encoder.forward(&features.batch_item(1), &mut ctx);
        let view = both.source(1);
        for (a, b) in view.outputs.data.iter().zip(&second.outputs.data) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(view.state.batch_size(), 1);
    }

    #[test]
    fn test_bptt_matches_finite_difference() {
        let mut encoder = TrainableEncoder::new(2, 3, 1, 0.0, 4);
        let mut ctx = ExecutionContext::new(0);
        let features = Tensor::new(random_init(2 * 4 * 2, 5, 1.0), vec![2, 4, 2]);
        let r_out = Tensor::new(random_init(2 * 4 * 3, 6, 1.0), vec![2, 4, 3]);
        let r_c = Tensor::new(random_init(2 * 3, 7, 1.0), vec![2, 3]);

        let loss = |enc: &TrainableEncoder, ctx: &mut ExecutionContext| -> f32 {
            let (out, _) = enc.forward(&features, ctx);
            let a: f32 = out.outputs.data.iter().zip(&r_out.data).map(|(x, y)| x * y).sum();
            let b: f32 = out.state.c[0].data.iter().zip(&r_c.data).map(|(x, y)| x * y).sum();
            a + b
        };

        let (_, cache) = encoder.forward(&features, &mut ctx);
        let mut d_final = encoder.lstm.zero_state(2);
        d_final.c[0] = r_c.clone();
        let grads = encoder.backward(&r_out, &d_final, &cache);

        let eps = 1e-2;
        for idx in [0, 5, 13, 30, 35] {
            let orig = encoder.lstm.layers[0].w_hh.data[idx];
            encoder.lstm.layers[0].w_hh.data[idx] = orig + eps;
            let plus = loss(&encoder, &mut ctx);
            encoder.lstm.layers[0].w_hh.data[idx] = orig - eps;
            let minus = loss(&encoder, &mut ctx);
            encoder.lstm.layers[0].w_hh.data[idx] = orig;
            let numeric = (plus - minus) / (2.0 * eps);
            let analytic = grads.layers[0].w_hh.data[idx];
            assert!((numeric - analytic).abs() < 5e-3, "dW_hh[{}]: {} vs {}", idx, numeric, analytic);
        }
    }
}
