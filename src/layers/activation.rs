//! Activation Functions
//!
//! The recurrent layers use two saturating nonlinearities.
//!
//! ```text
//! sigmoid(x) = 1 / (1 + e^(-x))      sigmoid'(x) = s × (1 - s)
//! tanh(x)                             tanh'(x)    = 1 - t²
//! ```
//!
//! Both derivatives are expressed in terms of the forward *output*, so the
//! backward functions take the cached activation rather than the input.

use crate::tensor::Tensor;
use rayon::prelude::*;

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Gradient through sigmoid given the forward output `s`
pub fn sigmoid_backward(grad_out: &Tensor, s: &Tensor) -> Tensor {
    let data = s
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&s, &g)| g * s * (1.0 - s))
        .collect();
    Tensor::new(data, s.shape.clone())
}

/// Gradient through tanh given the forward output `t`
pub fn tanh_backward(grad_out: &Tensor, t: &Tensor) -> Tensor {
    let data = t
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&t, &g)| g * (1.0 - t * t))
        .collect();
    Tensor::new(data, t.shape.clone())
}
