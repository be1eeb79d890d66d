//! Execution Context
//!
//! One value, built once at startup and passed by `&mut` to everything that
//! needs randomness or behaves differently in training and evaluation:
//!
//! - the seeded random number generator (dropout masks, shuffling, teacher forcing)
//! - the train/eval mode switch
//! - the worker thread count for the Rayon pool used by tensor kernels

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Whether stochastic layers are active
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Process-wide execution state
pub struct ExecutionContext {
    pub rng: StdRng,
    pub mode: Mode,
    threads: usize,
}

impl ExecutionContext {
    /// Create a context with a fixed seed, starting in evaluation mode
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            mode: Mode::Eval,
            threads: rayon::current_num_threads(),
        }
    }

    /// Size the global Rayon pool
    ///
    /// The global pool can only be built once per process. Later calls keep the
    /// existing pool and report its size.
    pub fn with_threads(mut self, threads: usize) -> Self {
        if threads > 0 {
            if let Err(e) = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
            {
                tracing::warn!("Keeping existing thread pool: {}", e);
            }
        }
        self.threads = rayon::current_num_threads();
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn train(&mut self) {
        self.mode = Mode::Train;
    }

    pub fn eval(&mut self) {
        self.mode = Mode::Eval;
    }

    pub fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }

    /// Bernoulli draw with probability `p`
    pub fn coin(&mut self, p: f32) -> bool {
        self.rng.gen::<f32>() < p
    }

    /// Derive a seed for deterministic weight initialization
    pub fn next_seed(&mut self) -> u64 {
        self.rng.gen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = ExecutionContext::new(7);
        let mut b = ExecutionContext::new(7);
        let xs: Vec<bool> = (0..32).map(|_| a.coin(0.5)).collect();
        let ys: Vec<bool> = (0..32).map(|_| b.coin(0.5)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_mode_switch() {
        let mut ctx = ExecutionContext::new(0);
        assert!(!ctx.is_training());
        ctx.train();
        assert!(ctx.is_training());
        ctx.eval();
        assert_eq!(ctx.mode, Mode::Eval);
        assert!(ctx.threads() >= 1);
    }

    #[test]
    fn test_coin_extremes() {
        let mut ctx = ExecutionContext::new(3);
        assert!((0..100).all(|_| !ctx.coin(0.0)));
        assert!((0..100).all(|_| ctx.coin(1.0)));
    }
}
