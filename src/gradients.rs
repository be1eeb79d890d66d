//! Gradient Utilities
//!
//! Global gradient norm for monitoring and optional clipping for stability.
//!
//! ## Algorithm
//!
//! ```text
//! norm = √(Σ gradient²)  // over every parameter gradient
//! if norm > max_norm:
//!     gradients *= (max_norm / norm)
//! ```
//!
//! Every gradient is scaled by the same factor, so the update direction is
//! unchanged.
//!
//! ## Example
//!
//! ```rust
//! use vidcap::gradients::{clip_gradients, compute_grad_norm};
//! use vidcap::Tensor;
//!
//! let mut a = Tensor::new(vec![3.0], vec![1]);
//! let mut b = Tensor::new(vec![4.0], vec![1]);
//! assert_eq!(compute_grad_norm(&[&a, &b]), 5.0);
//!
//! clip_gradients(vec![&mut a, &mut b], 1.0);
//! assert!((a.data[0] - 0.6).abs() < 1e-6);
//! ```

use crate::tensor::Tensor;
use rayon::prelude::*;

/// L2 norm over all gradient tensors
pub fn compute_grad_norm(grads: &[&Tensor]) -> f32 {
    grads.iter().map(|g| g.sum_squares()).sum::<f32>().sqrt()
}

/// Scale gradients down so their global norm is at most `max_norm`
///
/// Returns the norm before clipping.
pub fn clip_gradients(mut grads: Vec<&mut Tensor>, max_norm: f32) -> f32 {
    let norm = {
        let views: Vec<&Tensor> = grads.iter().map(|g| &**g).collect();
        compute_grad_norm(&views)
    };

    if norm > max_norm {
        let scale = max_norm / norm;
        for g in grads.iter_mut() {
            g.data.par_iter_mut().for_each(|val| *val *= scale);
        }
    }
    norm
}
