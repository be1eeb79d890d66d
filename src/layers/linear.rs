//! Linear Layer (Fully Connected)
//!
//! Performs an affine transformation `y = x @ W + b` on a batch of row vectors.
//! The bias is optional: the attention scoring vector is a bias-free projection.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [batch, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]            (optional)
//! Output: y = x @ W + b [batch, out_features]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_W = x^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = grad_y @ W^T
//! ```
//!
//! ## Initialization
//!
//! Weights and bias are drawn uniformly from `[-1/√in, 1/√in]`, the usual
//! default for recurrent captioning models.

use crate::tensor::Tensor;

/// Deterministic uniform initializer
///
/// Uses a simple LCG (Linear Congruential Generator) so that a seed fully
/// determines the initial weights. Values fall in `[-scale, scale)`.
pub fn random_init(size: usize, seed: u64, scale: f32) -> Vec<f32> {
    let mut rng = seed;
    (0..size)
        .map(|_| {
            rng = rng.wrapping_mul(1103515245).wrapping_add(12345);
            let val = ((rng / 65536) % 32768) as f32 / 32768.0;
            (val - 0.5) * 2.0 * scale
        })
        .collect()
}

/// Linear layer (fully connected)
#[derive(Clone, Debug)]
pub struct TrainableLinear {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl TrainableLinear {
    /// Create a linear layer with a bias
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let scale = 1.0 / (in_features as f32).sqrt();
        Self {
            weight: Tensor::new(
                random_init(in_features * out_features, seed, scale),
                vec![in_features, out_features],
            ),
            bias: Some(Tensor::new(
                random_init(out_features, seed.wrapping_add(1), scale),
                vec![out_features],
            )),
        }
    }

    /// Create a linear layer without a bias
    pub fn without_bias(in_features: usize, out_features: usize, seed: u64) -> Self {
        let mut layer = Self::new(in_features, out_features, seed);
        layer.bias = None;
        layer
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape[1]
    }

    /// Forward pass without keeping a cache (inference)
    pub fn apply(&self, x: &Tensor) -> Tensor {
        let y = x.matmul(&self.weight);
        match &self.bias {
            Some(b) => y.add(b),
            None => y,
        }
    }

    /// Forward pass
    ///
    /// Computes `y = x @ W + b` and caches `x` for the backward pass.
    pub fn forward(&self, x: &Tensor) -> (Tensor, LinearCache) {
        let y = self.apply(x);
        (y, LinearCache { x: x.clone() })
    }

    /// Backward pass
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient with respect to the output `[batch, out_features]`
    /// * `cache` - Cached input from the forward pass
    pub fn backward(&self, grad_out: &Tensor, cache: &LinearCache) -> LinearGradients {
        let grad_weight = cache.x.transpose().matmul(grad_out);

        let grad_bias = self.bias.as_ref().map(|b| {
            let cols = grad_out.cols();
            let mut sums = vec![0.0; cols];
            for row in grad_out.data.chunks(cols) {
                for (s, &g) in sums.iter_mut().zip(row) {
                    *s += g;
                }
            }
            Tensor::new(sums, b.shape.clone())
        });

        let grad_x = grad_out.matmul(&self.weight.transpose());

        LinearGradients {
            weight: grad_weight,
            bias: grad_bias,
            x: grad_x,
        }
    }

    /// Parameters in a fixed order: weight, then bias if present
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
    }
}

/// Cache for linear layer backward pass
pub struct LinearCache {
    pub x: Tensor,
}

/// Gradients for linear layer
pub struct LinearGradients {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    /// Gradient to pass to the previous layer
    pub x: Tensor,
}

/// Parameter gradients of a linear layer, accumulated across timesteps
#[derive(Clone, Debug)]
pub struct LinearParamGrads {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl LinearParamGrads {
    pub fn zeros_like(layer: &TrainableLinear) -> Self {
        Self {
            weight: Tensor::zeros(layer.weight.shape.clone()),
            bias: layer.bias.as_ref().map(|b| Tensor::zeros(b.shape.clone())),
        }
    }

    /// Add the parameter part of one backward call
    pub fn accumulate(&mut self, grads: &LinearGradients) {
        self.weight.add_assign(&grads.weight);
        if let (Some(acc), Some(g)) = (self.bias.as_mut(), grads.bias.as_ref()) {
            acc.add_assign(g);
        }
    }

    /// Same order as [`TrainableLinear::parameters`]
    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = vec![&self.weight];
        out.extend(self.bias.as_ref());
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out = vec![&mut self.weight];
        out.extend(self.bias.as_mut());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_init_is_deterministic_and_bounded() {
        let a = random_init(100, 42, 0.5);
        let b = random_init(100, 42, 0.5);
        assert_eq!(a, b);
        assert!(a.iter().all(|&x| (-0.5..0.5).contains(&x)));
        assert_ne!(a, random_init(100, 43, 0.5));
    }

    #[test]
    fn test_backward_matches_manual() {
        let mut layer = TrainableLinear::new(2, 2, 1);
        layer.weight = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        layer.bias = Some(Tensor::new(vec![0.5, -0.5], vec![2]));

        let x = Tensor::new(vec![1.0, 1.0, 2.0, 0.0], vec![2, 2]);
        let (y, cache) = layer.forward(&x);
        assert_eq!(y.data, vec![4.5, 5.5, 2.5, 3.5]);

        let grad_out = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
        let grads = layer.backward(&grad_out, &cache);
        assert_eq!(grads.weight.data, vec![1.0, 2.0, 1.0, 0.0]);
        assert_eq!(grads.bias.unwrap().data, vec![1.0, 1.0]);
        assert_eq!(grads.x.data, vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_without_bias() {
        let layer = TrainableLinear::without_bias(3, 1, 9);
        assert!(layer.bias.is_none());
        assert_eq!(layer.parameters().len(), 1);
        let (_, cache) = layer.forward(&Tensor::zeros(vec![2, 3]));
        let grads = layer.backward(&Tensor::zeros(vec![2, 1]), &cache);
        assert!(grads.bias.is_none());
    }
}
