//! Dropout Layer
//!
//! Randomly zeros activations in training mode and rescales the survivors by
//! `1 / (1 - rate)`. In evaluation mode values pass through unchanged. The
//! mask is drawn from the execution context's RNG so runs are reproducible.

use crate::context::ExecutionContext;
use crate::tensor::Tensor;
use rand::Rng;

/// Dropout with a fixed rate
#[derive(Clone, Copy, Debug)]
pub struct TrainableDropout {
    pub rate: f32,
}

impl TrainableDropout {
    /// # Panics
    ///
    /// Panics if `rate` is outside `[0, 1]`.
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&rate),
            "Dropout rate must be between 0.0 and 1.0"
        );
        Self { rate }
    }

    /// Forward pass, returning the output and the mask needed for backward
    pub fn forward(&self, x: &Tensor, ctx: &mut ExecutionContext) -> (Tensor, DropoutCache) {
        if !ctx.is_training() || self.rate == 0.0 {
            let cache = DropoutCache {
                mask: None,
                scale: 1.0,
            };
            return (x.clone(), cache);
        }

        if self.rate >= 1.0 {
            let cache = DropoutCache {
                mask: Some(vec![false; x.data.len()]),
                scale: 1.0,
            };
            return (Tensor::zeros(x.shape.clone()), cache);
        }

        let scale = 1.0 / (1.0 - self.rate);
        let mut mask = Vec::with_capacity(x.data.len());
        let mut output = Tensor::zeros(x.shape.clone());

        for (i, &v) in x.data.iter().enumerate() {
            let keep = ctx.rng.gen::<f32>() >= self.rate;
            mask.push(keep);
            if keep {
                output.data[i] = v * scale;
            }
        }

        (
            output,
            DropoutCache {
                mask: Some(mask),
                scale,
            },
        )
    }

    /// Backward pass: apply the forward mask and scale to the gradient
    pub fn backward(&self, grad_output: &Tensor, cache: &DropoutCache) -> Tensor {
        match &cache.mask {
            Some(mask) => {
                let data = grad_output
                    .data
                    .iter()
                    .zip(mask)
                    .map(|(&g, &keep)| if keep { g * cache.scale } else { 0.0 })
                    .collect();
                Tensor::new(data, grad_output.shape.clone())
            }
            None => grad_output.clone(),
        }
    }
}

/// Cache for dropout backward pass
pub struct DropoutCache {
    /// true = kept, false = dropped; None when dropout was inactive
    pub mask: Option<Vec<bool>>,
    pub scale: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_mode_is_identity() {
        let mut ctx = ExecutionContext::new(0);
        let x = Tensor::new(vec![1.0, 2.0, 3.0], vec![1, 3]);
        let (y, cache) = TrainableDropout::new(0.5).forward(&x, &mut ctx);
        assert_eq!(y, x);
        assert!(cache.mask.is_none());
    }

    #[test]
    fn test_train_mode_masks_and_scales() {
        let mut ctx = ExecutionContext::new(11);
        ctx.train();
        let dropout = TrainableDropout::new(0.5);
        let x = Tensor::new(vec![1.0; 64], vec![8, 8]);
        let (y, cache) = dropout.forward(&x, &mut ctx);
        let mask = cache.mask.as_ref().unwrap();
        for (&v, &keep) in y.data.iter().zip(mask) {
            assert_eq!(v, if keep { 2.0 } else { 0.0 });
        }

        let g = dropout.backward(&Tensor::new(vec![1.0; 64], vec![8, 8]), &cache);
        assert_eq!(g, y);
    }
}
