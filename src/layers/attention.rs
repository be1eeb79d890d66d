//! Additive Attention
//!
//! Scores every encoder timestep against the decoder's current hidden state
//! and returns a context vector: the attention-weighted sum of encoder outputs.
//!
//! ## Forward Pass
//!
//! ```text
//! e[b,t]  = tanh(W_a · [h_b ; enc[b,t]] + b_a)      [H]
//! s[b,t]  = v · e[b,t]                              scalar, v has no bias
//! a[b,:]  = softmax(s[b,:])                         over timesteps
//! ctx[b]  = Σ_t a[b,t] · enc[b,t]                   [H]
//! ```
//!
//! ## Call Shapes
//!
//! Two pairings of decoder rows and encoder sources are accepted:
//!
//! - **one source per row**: encoder batch equals the state batch (training)
//! - **one shared source**: encoder batch is 1 and every state row reads it
//!   (beam search hypotheses over a single video)
//!
//! Anything else is a programming error and panics with both shapes.
//!
//! ## Backward Pass
//!
//! ```text
//! da[b,t]  = d_ctx[b] · enc[b,t]
//! d_enc   += a[b,t] · d_ctx[b]
//! ds[b,t]  = a[b,t] · (da[b,t] - Σ_u a[b,u] · da[b,u])     softmax
//! dv, de   = linear backward of v
//! d_pre    = de ⊙ (1 - e²)                                  tanh
//! dX       = linear backward of W_a, split into d_h (summed over t) and d_enc
//! ```

use super::linear::{LinearCache, LinearGradients, LinearParamGrads, TrainableLinear};
use crate::tensor::Tensor;

/// Additive attention parameters
#[derive(Clone, Debug)]
pub struct TrainableAttention {
    /// `2H -> H` alignment projection
    pub attn: TrainableLinear,
    /// `H -> 1` scoring vector, no bias
    pub v: TrainableLinear,
}

/// Values saved for the backward pass
pub struct AttentionCache {
    attn_cache: LinearCache,
    v_cache: LinearCache,
    energy: Tensor,
    weights: Tensor,
    encoder_outputs: Tensor,
}

/// Gradients from one attention backward call
pub struct AttentionGradients {
    pub attn: LinearGradients,
    pub v: LinearGradients,
    /// Gradient for the decoder hidden state `[batch, H]`
    pub hidden: Tensor,
    /// Gradient for the encoder outputs, same shape as the encoder outputs
    pub encoder_outputs: Tensor,
}

/// Accumulated parameter gradients
#[derive(Clone, Debug)]
pub struct AttentionParamGrads {
    pub attn: LinearParamGrads,
    pub v: LinearParamGrads,
}

/// Which encoder source decoder row `b` attends over
///
/// # Panics
///
/// Panics unless the encoder batch equals the state batch or is 1.
fn source_index(encoder_batch: usize, state_batch: usize) -> impl Fn(usize) -> usize {
    assert!(
        encoder_batch == state_batch || encoder_batch == 1,
        "attention needs one encoder source per decoder row or a single shared source: \
         encoder batch {} vs decoder batch {}",
        encoder_batch,
        state_batch
    );
    move |b| if encoder_batch == 1 { 0 } else { b }
}

impl TrainableAttention {
    pub fn new(hidden_size: usize, seed: u64) -> Self {
        Self {
            attn: TrainableLinear::new(2 * hidden_size, hidden_size, seed),
            v: TrainableLinear::without_bias(hidden_size, 1, seed.wrapping_add(2)),
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.attn.out_features()
    }

    /// Alignment weights `[batch, T]` of `hidden [batch, H]` over `encoder_outputs [N, T, H]`
    pub fn weights(&self, hidden: &Tensor, encoder_outputs: &Tensor) -> Tensor {
        self.forward(hidden, encoder_outputs).1
    }

    /// Forward pass
    ///
    /// Returns `(context [batch, H], weights [batch, T], cache)`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        encoder_outputs: &Tensor,
    ) -> (Tensor, Tensor, AttentionCache) {
        assert_eq!(
            encoder_outputs.shape.len(),
            3,
            "encoder outputs must be [batch, time, hidden], got {:?}",
            encoder_outputs.shape
        );
        let batch = hidden.rows();
        let (time, h) = (encoder_outputs.shape[1], encoder_outputs.shape[2]);
        assert_eq!(hidden.cols(), h, "hidden width {} vs encoder width {}", hidden.cols(), h);
        let src = source_index(encoder_outputs.shape[0], batch);

        // Rows of [h_b ; enc[src(b), t]] for every (b, t).
        let mut pairs = Vec::with_capacity(batch * time * 2 * h);
        for b in 0..batch {
            let h_row = &hidden.data[b * h..(b + 1) * h];
            let s = src(b);
            for t in 0..time {
                let start = (s * time + t) * h;
                pairs.extend_from_slice(h_row);
                pairs.extend_from_slice(&encoder_outputs.data[start..start + h]);
            }
        }
        let pairs = Tensor::new(pairs, vec![batch * time, 2 * h]);

        let (pre, attn_cache) = self.attn.forward(&pairs);
        let energy = pre.map(f32::tanh);
        let (scores, v_cache) = self.v.forward(&energy);
        let weights = scores.reshape(&[batch, time]).softmax_rows();
        let context = apply_attention(&weights, encoder_outputs);

        let cache = AttentionCache {
            attn_cache,
            v_cache,
            energy,
            weights: weights.clone(),
            encoder_outputs: encoder_outputs.clone(),
        };
        (context, weights, cache)
    }

    /// Backward pass from the context gradient `d_context [batch, H]`
    pub fn backward(&self, d_context: &Tensor, cache: &AttentionCache) -> AttentionGradients {
        let enc = &cache.encoder_outputs;
        let (batch, time) = (cache.weights.shape[0], cache.weights.shape[1]);
        let h = enc.shape[2];
        let src = source_index(enc.shape[0], batch);

        let mut d_enc = Tensor::zeros(enc.shape.clone());
        let mut d_scores = vec![0.0; batch * time];

        for b in 0..batch {
            let s = src(b);
            let dc = &d_context.data[b * h..(b + 1) * h];
            let a = &cache.weights.data[b * time..(b + 1) * time];
            let mut d_a = vec![0.0; time];
            for t in 0..time {
                let start = (s * time + t) * h;
                let e = &enc.data[start..start + h];
                d_a[t] = dc.iter().zip(e).map(|(x, y)| x * y).sum();
                for (dst, &g) in d_enc.data[start..start + h].iter_mut().zip(dc) {
                    *dst += a[t] * g;
                }
            }
            let dot: f32 = a.iter().zip(&d_a).map(|(x, y)| x * y).sum();
            for t in 0..time {
                d_scores[b * time + t] = a[t] * (d_a[t] - dot);
            }
        }

        let d_scores = Tensor::new(d_scores, vec![batch * time, 1]);
        let v_grads = self.v.backward(&d_scores, &cache.v_cache);
        let d_pre = v_grads.x.mul(&cache.energy.map(|e| 1.0 - e * e));
        let attn_grads = self.attn.backward(&d_pre, &cache.attn_cache);

        let mut d_hidden = Tensor::zeros(vec![batch, h]);
        for b in 0..batch {
            let s = src(b);
            for t in 0..time {
                let row = &attn_grads.x.data[(b * time + t) * 2 * h..(b * time + t + 1) * 2 * h];
                for (dst, &g) in d_hidden.data[b * h..(b + 1) * h].iter_mut().zip(&row[..h]) {
                    *dst += g;
                }
                let start = (s * time + t) * h;
                for (dst, &g) in d_enc.data[start..start + h].iter_mut().zip(&row[h..]) {
                    *dst += g;
                }
            }
        }

        AttentionGradients {
            attn: attn_grads,
            v: v_grads,
            hidden: d_hidden,
            encoder_outputs: d_enc,
        }
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.attn.parameters();
        params.extend(self.v.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = self.attn.parameters_mut();
        params.extend(self.v.parameters_mut());
        params
    }
}

/// Weighted sum of encoder outputs: `weights [batch, T]`, `encoder_outputs [N, T, H]` -> `[batch, H]`
///
/// Follows the same pairing rules as [`TrainableAttention::forward`].
pub fn apply_attention(weights: &Tensor, encoder_outputs: &Tensor) -> Tensor {
    let (batch, time) = (weights.shape[0], weights.shape[1]);
    assert_eq!(
        encoder_outputs.shape[1], time,
        "weights cover {} timesteps, encoder outputs have {}",
        time, encoder_outputs.shape[1]
    );
    let h = encoder_outputs.shape[2];
    let src = source_index(encoder_outputs.shape[0], batch);

    let mut context = vec![0.0; batch * h];
    for b in 0..batch {
        let s = src(b);
        let out = &mut context[b * h..(b + 1) * h];
        for t in 0..time {
            let a = weights.data[b * time + t];
            let start = (s * time + t) * h;
            for (o, &e) in out.iter_mut().zip(&encoder_outputs.data[start..start + h]) {
                *o += a * e;
            }
        }
    }
    Tensor::new(context, vec![batch, h])
}

impl AttentionParamGrads {
    pub fn zeros_like(attention: &TrainableAttention) -> Self {
        Self {
            attn: LinearParamGrads::zeros_like(&attention.attn),
            v: LinearParamGrads::zeros_like(&attention.v),
        }
    }

    pub fn accumulate(&mut self, grads: &AttentionGradients) {
        self.attn.accumulate(&grads.attn);
        self.v.accumulate(&grads.v);
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = self.attn.tensors();
        out.extend(self.v.tensors());
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = self.attn.tensors_mut();
        out.extend(self.v.tensors_mut());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::linear::random_init;

    fn fixture(batch: usize, sources: usize, time: usize, h: usize) -> (TrainableAttention, Tensor, Tensor) {
        let attention = TrainableAttention::new(h, 3);
        let hidden = Tensor::new(random_init(batch * h, 10, 1.0), vec![batch, h]);
        let enc = Tensor::new(random_init(sources * time * h, 11, 1.0), vec![sources, time, h]);
        (attention, hidden, enc)
    }

    #[test]
    fn test_weights_sum_to_one_and_context_width() {
        for time in [1, 4, 9] {
            let (attention, hidden, enc) = fixture(3, 3, time, 5);
            let (context, weights, _) = attention.forward(&hidden, &enc);
            assert_eq!(context.shape, vec![3, 5]);
            assert_eq!(weights.shape, vec![3, time]);
            for row in weights.data.chunks(time) {
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
                assert!(row.iter().all(|&w| w >= 0.0));
            }
        }
    }

    #[test]
    fn test_alignment_weights() {
        let (mut attention, hidden, enc) = fixture(2, 2, 4, 5);
        let (_, expected, _) = attention.forward(&hidden, &enc);
        assert_eq!(attention.weights(&hidden, &enc).data, expected.data);

        // Equal scores for every timestep give a uniform distribution.
        attention.v.weight = Tensor::zeros(attention.v.weight.shape.clone());
        let uniform = attention.weights(&hidden, &enc);
        assert_eq!(uniform.shape, vec![2, 4]);
        assert!(uniform.data.iter().all(|&w| (w - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_shared_source_broadcasts() {
        let (attention, hidden, enc) = fixture(3, 1, 4, 5);
        let (context, _, _) = attention.forward(&hidden, &enc);
        for b in 0..3 {
            let (single, _, _) = attention.forward(&hidden.row(b), &enc);
            for (x, y) in context.row(b).data.iter().zip(&single.data) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    #[should_panic(expected = "single shared source")]
    fn test_mismatched_batches_panic() {
        let (attention, hidden, enc) = fixture(3, 2, 4, 5);
        attention.forward(&hidden, &enc);
    }

    #[test]
    fn test_apply_attention_is_weighted_sum() {
        let enc = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![1, 2, 2]);
        let weights = Tensor::new(vec![0.25, 0.75], vec![1, 2]);
        assert_eq!(apply_attention(&weights, &enc).data, vec![0.25, 0.75]);
    }

    #[test]
    fn test_gradients_match_finite_difference() {
        for sources in [2, 1] {
            let (attention, hidden, enc) = fixture(2, sources, 3, 4);
            let probe = Tensor::new(random_init(8, 12, 1.0), vec![2, 4]);
            let loss = |att: &TrainableAttention, h: &Tensor, e: &Tensor| -> f32 {
                let (ctx, _, _) = att.forward(h, e);
                ctx.data.iter().zip(&probe.data).map(|(a, b)| a * b).sum()
            };

            let (_, _, cache) = attention.forward(&hidden, &enc);
            let grads = attention.backward(&probe, &cache);
            let eps = 1e-2;
            let tol = 2e-3;

            for idx in 0..hidden.data.len() {
                let mut plus = hidden.clone();
                plus.data[idx] += eps;
                let mut minus = hidden.clone();
                minus.data[idx] -= eps;
                let numeric = (loss(&attention, &plus, &enc) - loss(&attention, &minus, &enc)) / (2.0 * eps);
                assert!((numeric - grads.hidden.data[idx]).abs() < tol, "d_hidden[{}]", idx);
            }

            for idx in (0..enc.data.len()).step_by(3) {
                let mut plus = enc.clone();
                plus.data[idx] += eps;
                let mut minus = enc.clone();
                minus.data[idx] -= eps;
                let numeric = (loss(&attention, &hidden, &plus) - loss(&attention, &hidden, &minus)) / (2.0 * eps);
                assert!((numeric - grads.encoder_outputs.data[idx]).abs() < tol, "d_enc[{}]", idx);
            }

            for idx in [0, 7, 20, 31] {
                let mut plus = attention.clone();
                plus.attn.weight.data[idx] += eps;
                let mut minus = attention.clone();
                minus.attn.weight.data[idx] -= eps;
                let numeric = (loss(&plus, &hidden, &enc) - loss(&minus, &hidden, &enc)) / (2.0 * eps);
                assert!((numeric - grads.attn.weight.data[idx]).abs() < tol, "d_attn[{}]", idx);
            }

            for idx in 0..4 {
                let mut plus = attention.clone();
                plus.v.weight.data[idx] += eps;
                let mut minus = attention.clone();
                minus.v.weight.data[idx] -= eps;
                let numeric = (loss(&plus, &hidden, &enc) - loss(&minus, &hidden, &enc)) / (2.0 * eps);
                assert!((numeric - grads.v.weight.data[idx]).abs() < tol, "d_v[{}]", idx);
            }
        }
    }
}
