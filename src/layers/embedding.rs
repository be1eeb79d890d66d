//! Token Embedding
//!
//! A lookup table mapping token ids to dense vectors. The backward pass is a
//! scatter-add: each row of the incoming gradient is added to the table row
//! of the token that produced it, so repeated tokens accumulate.

use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

/// Embedding table `[vocab_size, dim]`
#[derive(Clone, Debug)]
pub struct TrainableEmbedding {
    pub weight: Tensor,
}

impl TrainableEmbedding {
    /// Create an embedding table with entries drawn from N(0, 1)
    pub fn new(vocab_size: usize, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..vocab_size * dim)
            .map(|_| -> f32 { StandardNormal.sample(&mut rng) })
            .collect();
        Self {
            weight: Tensor::new(data, vec![vocab_size, dim]),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.shape[0]
    }

    pub fn dim(&self) -> usize {
        self.weight.shape[1]
    }

    /// Look up a batch of tokens: `[batch] -> [batch, dim]`
    ///
    /// # Panics
    ///
    /// Panics on a token id outside the table.
    pub fn forward(&self, tokens: &[usize]) -> Tensor {
        let dim = self.dim();
        let mut data = Vec::with_capacity(tokens.len() * dim);
        for &token in tokens {
            assert!(
                token < self.vocab_size(),
                "token id {} out of range for vocabulary of {}",
                token,
                self.vocab_size()
            );
            data.extend_from_slice(&self.weight.data[token * dim..(token + 1) * dim]);
        }
        Tensor::new(data, vec![tokens.len(), dim])
    }

    /// Scatter-add `grad_out [batch, dim]` into `grad_table`
    pub fn backward(&self, grad_out: &Tensor, tokens: &[usize], grad_table: &mut Tensor) {
        let dim = self.dim();
        for (row, &token) in grad_out.data.chunks(dim).zip(tokens) {
            let dst = &mut grad_table.data[token * dim..(token + 1) * dim];
            for (d, &g) in dst.iter_mut().zip(row) {
                *d += g;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_returns_rows() {
        let mut emb = TrainableEmbedding::new(4, 2, 0);
        emb.weight = Tensor::new((0..8).map(|i| i as f32).collect(), vec![4, 2]);
        let out = emb.forward(&[3, 0, 3]);
        assert_eq!(out.shape, vec![3, 2]);
        assert_eq!(out.data, vec![6.0, 7.0, 0.0, 1.0, 6.0, 7.0]);
    }

    #[test]
    fn test_backward_accumulates_repeated_tokens() {
        let emb = TrainableEmbedding::new(4, 2, 0);
        let mut grad = Tensor::zeros(vec![4, 2]);
        let grad_out = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]);
        emb.backward(&grad_out, &[1, 2, 1], &mut grad);
        assert_eq!(grad.data, vec![0.0, 0.0, 6.0, 8.0, 3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_token_panics() {
        TrainableEmbedding::new(4, 2, 0).forward(&[4]);
    }
}
