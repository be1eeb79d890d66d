//! Adam Optimizer
//!
//! Adam with optional decoupled weight decay (AdamW). With `weight_decay = 0`
//! it is plain Adam, the default for caption training.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g:
//!
//! ```text
//! θ = θ * (1 - α * λ)              # Weight decay (2D tensors only, if λ > 0)
//! m = β₁ * m + (1 - β₁) * g        # First moment (momentum)
//! v = β₂ * v + (1 - β₂) * g²       # Second moment (variance)
//! m_hat = m / (1 - β₁^t)           # Bias correction
//! v_hat = v / (1 - β₂^t)           # Bias correction
//! θ = θ - α * m_hat / (√v_hat + ε) # Parameter update
//! ```
//!
//! Defaults: β₁ = 0.9, β₂ = 0.999, ε = 1e-8.
//!
//! ## Parameter Lists
//!
//! The optimizer does not know the model's structure. It is handed the
//! model's parameters and the matching gradients as two lists in the same
//! order (see `Seq2Seq::parameters` and `Seq2SeqGradients::tensors`) and keeps
//! one `m` and one `v` tensor per entry.
//!
//! ## Example
//!
//! ```rust
//! use vidcap::optimizer::Adam;
//! use vidcap::Tensor;
//!
//! let mut w = Tensor::new(vec![1.0, -2.0], vec![2]);
//! let mut adam = Adam::new(&[&w]);
//! for _ in 0..300 {
//!     let g = w.mul_scalar(2.0); // gradient of Σ w²
//!     adam.step(vec![&mut w], &[&g], 0.05, 0.0);
//! }
//! assert!(w.sum_squares() < 1e-2);
//! ```

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Adam optimizer state
pub struct Adam {
    /// First moment per parameter
    pub m: Vec<Tensor>,
    /// Second moment per parameter
    pub v: Vec<Tensor>,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Number of updates applied so far
    pub step: usize,
}

impl Adam {
    /// Zeroed moments shaped like `params`
    pub fn new(params: &[&Tensor]) -> Self {
        Self {
            m: params.iter().map(|p| Tensor::zeros(p.shape.clone())).collect(),
            v: params.iter().map(|p| Tensor::zeros(p.shape.clone())).collect(),
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
        }
    }

    /// Apply one update to every parameter
    ///
    /// # Panics
    ///
    /// Panics if the lists differ in length from the optimizer state.
    pub fn step(&mut self, params: Vec<&mut Tensor>, grads: &[&Tensor], lr: f32, weight_decay: f32) {
        assert_eq!(params.len(), self.m.len(), "parameter list changed size");
        assert_eq!(grads.len(), self.m.len(), "gradient list does not match parameters");

        self.step += 1;
        let hp = StepParams {
            lr,
            weight_decay,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            bias_correction1: 1.0 - self.beta1.powi(self.step as i32),
            bias_correction2: 1.0 - self.beta2.powi(self.step as i32),
        };

        for (((param, grad), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            let decay = weight_decay > 0.0 && param.shape.len() == 2;
            adam_update_param(param, grad, m, v, &hp, decay);
        }
    }
}

struct StepParams {
    lr: f32,
    weight_decay: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    bias_correction1: f32,
    bias_correction2: f32,
}

#[inline(always)]
fn update_one(p: &mut f32, g: f32, m: &mut f32, v: &mut f32, hp: &StepParams, decay: bool) {
    if decay {
        *p *= 1.0 - hp.lr * hp.weight_decay;
    }
    *m = hp.beta1 * *m + (1.0 - hp.beta1) * g;
    *v = hp.beta2 * *v + (1.0 - hp.beta2) * g * g;
    let m_hat = *m / hp.bias_correction1;
    let v_hat = *v / hp.bias_correction2;
    *p -= hp.lr * m_hat / (v_hat.sqrt() + hp.epsilon);
}

/// Update one tensor; parallel above 1000 elements, sequential below
fn adam_update_param(
    param: &mut Tensor,
    grad: &Tensor,
    m: &mut Tensor,
    v: &mut Tensor,
    hp: &StepParams,
    decay: bool,
) {
    assert_eq!(param.shape, grad.shape, "gradient shape mismatch");
    if param.data.len() > 1000 {
        param
            .data
            .par_iter_mut()
            .zip(grad.data.par_iter())
            .zip(m.data.par_iter_mut().zip(v.data.par_iter_mut()))
            .for_each(|((p, &g), (m, v))| update_one(p, g, m, v, hp, decay));
    } else {
        for i in 0..param.data.len() {
            update_one(&mut param.data[i], grad.data[i], &mut m.data[i], &mut v.data[i], hp, decay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_lr() {
        // With bias correction the first update is lr * sign(g).
        let mut w = Tensor::new(vec![1.0, 1.0], vec![2]);
        let mut adam = Adam::new(&[&w]);
        let g = Tensor::new(vec![0.5, -3.0], vec![2]);
        adam.step(vec![&mut w], &[&g], 0.1, 0.0);
        assert!((w.data[0] - 0.9).abs() < 1e-5);
        assert!((w.data[1] - 1.1).abs() < 1e-5);
        assert_eq!(adam.step, 1);
    }

    #[test]
    fn test_reduces_quadratic_large_tensor() {
        // Large enough to take the parallel path.
        let mut w = Tensor::new((0..2000).map(|i| (i as f32 / 1000.0) - 1.0).collect(), vec![40, 50]);
        let start = w.sum_squares();
        let mut adam = Adam::new(&[&w]);
        for _ in 0..100 {
            let g = w.mul_scalar(2.0);
            adam.step(vec![&mut w], &[&g], 0.01, 0.0);
        }
        assert!(w.sum_squares() < start * 0.5);
    }

    #[test]
    fn test_weight_decay_only_on_matrices() {
        let mut matrix = Tensor::new(vec![1.0; 4], vec![2, 2]);
        let mut bias = Tensor::new(vec![1.0; 2], vec![2]);
        let mut adam = Adam::new(&[&matrix, &bias]);
        let gm = Tensor::zeros(vec![2, 2]);
        let gb = Tensor::zeros(vec![2]);
        adam.step(vec![&mut matrix, &mut bias], &[&gm, &gb], 0.1, 0.5);
        assert!((matrix.data[0] - 0.95).abs() < 1e-6);
        assert_eq!(bias.data[0], 1.0);
    }
}
