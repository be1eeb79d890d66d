//! Tensor Operations for Recurrent Networks
//!
//! A minimal tensor library sized for an LSTM encoder-decoder. Tensors store
//! a flat row-major `Vec<f32>` plus a shape.
//!
//! ## Layout Conventions
//!
//! - **2D `[rows, cols]`**: a batch of row vectors (`[batch, hidden]`, `[batch, vocab]`)
//! - **3D `[batch, time, dim]`**: per-timestep sequences (video features, encoder outputs)
//!
//! Most operations are written for these two layouts and panic on anything else,
//! with the offending shapes in the message.
//!
//! ## Example
//!
//! ```rust
//! use vidcap::Tensor;
//!
//! let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let w = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let y = x.matmul(&w);
//! assert_eq!(y.shape, vec![2, 2]);
//! assert_eq!(y.data, vec![4.0, 5.0, 10.0, 11.0]);
//! ```
//!
//! ## Performance
//!
//! Matrix multiplication, elementwise maps and row softmax run on Rayon.
//! Small matrix products stay sequential to avoid scheduling overhead. Each
//! output element is accumulated in the same order on both paths, so results
//! do not depend on batch size.

use rayon::prelude::*;

/// A multi-dimensional array of `f32` values in row-major order
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        Self { data, shape }
    }

    /// Create a tensor filled with zeros
    ///
    /// ```rust
    /// # use vidcap::Tensor;
    /// let tensor = Tensor::zeros(vec![3, 4]);
    /// assert_eq!(tensor.data.len(), 12);
    /// assert!(tensor.data.iter().all(|&x| x == 0.0));
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Number of rows of a 2D tensor (batch size)
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Size of the last dimension
    pub fn cols(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// 2D matrix multiplication `[m, k] @ [k, n] -> [m, n]`
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            let row = &mut result[i * n..(i + 1) * n];
            for l in 0..k {
                Self::matmul_inner_simd(self.data[i * k + l], &other.data[l * n..(l + 1) * n], row);
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Output rows are split into blocks of 8 and distributed across the Rayon
    /// pool; the inner dimension is walked in ascending order so every output
    /// element sees the same summation order as the sequential path.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Row-wise softmax of a 2D tensor
    ///
    /// Uses the max-subtraction form so large scores cannot overflow `exp`.
    ///
    /// ```rust
    /// # use vidcap::Tensor;
    /// let scores = Tensor::new(vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0], vec![2, 3]);
    /// let probs = scores.softmax_rows();
    /// let first: f32 = probs.data[..3].iter().sum();
    /// assert!((first - 1.0).abs() < 1e-6);
    /// ```
    pub fn softmax_rows(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "softmax_rows expects 2D, got {:?}", self.shape);
        let cols = self.shape[1];

        let result: Vec<f32> = self
            .data
            .par_chunks(cols)
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let exp_values: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
                let sum: f32 = exp_values.iter().sum();
                exp_values.into_iter().map(move |val| val / sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Row-wise log-softmax of a 2D tensor
    ///
    /// `log_softmax(x)[i] = x[i] - max - ln(sum(exp(x[j] - max)))`
    pub fn log_softmax_rows(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "log_softmax_rows expects 2D, got {:?}", self.shape);
        let cols = self.shape[1];

        let result: Vec<f32> = self
            .data
            .par_chunks(cols)
            .flat_map_iter(|row| {
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
                row.iter().map(move |&x| x - max - log_sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Index of the largest value in every row (first one wins on ties)
    pub fn argmax_rows(&self) -> Vec<usize> {
        let cols = self.cols();
        self.data
            .chunks(cols)
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }

    /// Element-wise addition
    ///
    /// Supports an exact shape match and broadcasting over the last dimension
    /// (`[*, n] + [n]`, used for biases).
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if self.shape.len() > other.shape.len() && other.data.len() == self.cols() {
            let last_dim = self.cols();
            let result: Vec<f32> = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, &x)| x + other.data[i % last_dim])
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// Element-wise multiplication (shapes must match)
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for mul");
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Apply `f` to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// In-place accumulation, used to sum gradients across timesteps
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for add_assign: {:?} += {:?}",
            self.shape, other.shape
        );
        self.data
            .par_iter_mut()
            .zip(&other.data)
            .for_each(|(a, &b)| *a += b);
    }

    /// Sum of squared elements
    pub fn sum_squares(&self) -> f32 {
        self.data.par_iter().map(|&x| x * x).sum()
    }

    /// Reshape tensor to new shape (element count must be unchanged)
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} to {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Transpose of a 2D tensor
    ///
    /// ```rust
    /// # use vidcap::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let transposed = tensor.transpose();
    /// assert_eq!(transposed.shape, vec![3, 2]);
    /// assert_eq!(transposed.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// ```
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.shape.len(), 2, "transpose expects 2D, got {:?}", self.shape);
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut result = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::new(result, vec![cols, rows])
    }

    /// Concatenate two 2D tensors along columns: `[b, n] ++ [b, m] -> [b, n + m]`
    pub fn concat_cols(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2 && self.shape[0] == other.shape[0],
            "concat_cols needs 2D tensors with equal rows: {:?} ++ {:?}",
            self.shape,
            other.shape
        );
        let (n, m) = (self.shape[1], other.shape[1]);
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        for (a, b) in self.data.chunks(n).zip(other.data.chunks(m)) {
            data.extend_from_slice(a);
            data.extend_from_slice(b);
        }
        Tensor::new(data, vec![self.shape[0], n + m])
    }

    /// Columns `start..start + len` of a 2D tensor
    pub fn narrow_cols(&self, start: usize, len: usize) -> Tensor {
        assert_eq!(self.shape.len(), 2, "narrow_cols expects 2D, got {:?}", self.shape);
        let cols = self.shape[1];
        assert!(start + len <= cols, "narrow_cols {}..{} out of {}", start, start + len, cols);
        let data = self
            .data
            .chunks(cols)
            .flat_map(|row| row[start..start + len].iter().copied())
            .collect();
        Tensor::new(data, vec![self.shape[0], len])
    }

    /// Row `i` of a 2D tensor as a `[1, cols]` tensor
    pub fn row(&self, i: usize) -> Tensor {
        let cols = self.cols();
        Tensor::new(self.data[i * cols..(i + 1) * cols].to_vec(), vec![1, cols])
    }

    /// Stack 2D tensors with equal widths on top of each other
    pub fn stack_rows(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "stack_rows needs at least one tensor");
        let cols = parts[0].cols();
        let mut rows = 0;
        let mut data = Vec::new();
        for part in parts {
            assert_eq!(part.cols(), cols, "stack_rows width mismatch");
            rows += part.rows();
            data.extend_from_slice(&part.data);
        }
        Tensor::new(data, vec![rows, cols])
    }

    /// Timestep `t` of a `[batch, time, dim]` tensor as `[batch, dim]`
    pub fn time_step(&self, t: usize) -> Tensor {
        assert_eq!(self.shape.len(), 3, "time_step expects 3D, got {:?}", self.shape);
        let (batch, time, dim) = (self.shape[0], self.shape[1], self.shape[2]);
        assert!(t < time, "timestep {} out of range {}", t, time);
        let mut data = Vec::with_capacity(batch * dim);
        for b in 0..batch {
            let start = (b * time + t) * dim;
            data.extend_from_slice(&self.data[start..start + dim]);
        }
        Tensor::new(data, vec![batch, dim])
    }

    /// Assemble `[batch, dim]` timesteps into a `[batch, time, dim]` tensor
    pub fn from_time_steps(steps: &[Tensor]) -> Tensor {
        assert!(!steps.is_empty(), "from_time_steps needs at least one step");
        let (batch, dim) = (steps[0].rows(), steps[0].cols());
        let time = steps.len();
        let mut data = vec![0.0; batch * time * dim];
        for (t, step) in steps.iter().enumerate() {
            for b in 0..batch {
                let dst = (b * time + t) * dim;
                data[dst..dst + dim].copy_from_slice(&step.data[b * dim..(b + 1) * dim]);
            }
        }
        Tensor::new(data, vec![batch, time, dim])
    }

    /// Batch element `b` of a 3D tensor as `[1, time, dim]`
    pub fn batch_item(&self, b: usize) -> Tensor {
        assert_eq!(self.shape.len(), 3, "batch_item expects 3D, got {:?}", self.shape);
        let item = self.shape[1] * self.shape[2];
        Tensor::new(
            self.data[b * item..(b + 1) * item].to_vec(),
            vec![1, self.shape[1], self.shape[2]],
        )
    }
}
