//! Long Short-Term Memory
//!
//! A single LSTM cell and a stack of cells with optional dropout between
//! layers. Both run one timestep at a time on a batch of row vectors; the
//! encoder and decoder drive the time loop themselves.
//!
//! ## Cell Equations
//!
//! Gate columns are laid out as `[input | forget | cell | output]`:
//!
//! ```text
//! z  = x @ W_ih + b_ih + h @ W_hh + b_hh       [batch, 4H]
//! i  = σ(z_i)   f = σ(z_f)   g = tanh(z_g)   o = σ(z_o)
//! c' = f ⊙ c + i ⊙ g
//! h' = o ⊙ tanh(c')
//! ```
//!
//! ## Backward Pass
//!
//! Given `dh'` and `dc'` (gradient arriving from the next timestep):
//!
//! ```text
//! dc_total = dc' + dh' ⊙ o ⊙ (1 - tanh²(c'))
//! do = dh' ⊙ tanh(c')        di = dc_total ⊙ g
//! dg = dc_total ⊙ i          df = dc_total ⊙ c
//! dc = dc_total ⊙ f
//! dz = [di·σ' | df·σ' | dg·tanh' | do·σ']
//! dx = dz @ W_ihᵀ            dh = dz @ W_hhᵀ
//! ```

use crate::context::ExecutionContext;
use crate::layers::activation::{sigmoid, sigmoid_backward, tanh_backward};
use crate::layers::dropout::{DropoutCache, TrainableDropout};
use crate::layers::linear::random_init;
use crate::tensor::Tensor;

/// Recurrent state of a stacked LSTM: one `[batch, hidden]` tensor per layer
#[derive(Clone, Debug, PartialEq)]
pub struct LstmState {
    pub h: Vec<Tensor>,
    pub c: Vec<Tensor>,
}

impl LstmState {
    pub fn zeros(num_layers: usize, batch: usize, hidden: usize) -> Self {
        Self {
            h: vec![Tensor::zeros(vec![batch, hidden]); num_layers],
            c: vec![Tensor::zeros(vec![batch, hidden]); num_layers],
        }
    }

    pub fn num_layers(&self) -> usize {
        self.h.len()
    }

    pub fn batch_size(&self) -> usize {
        self.h[0].rows()
    }

    /// Hidden state of the top layer
    pub fn top(&self) -> &Tensor {
        &self.h[self.h.len() - 1]
    }

    /// Row `i` of every layer, as a batch-of-one state
    pub fn row(&self, i: usize) -> Self {
        Self {
            h: self.h.iter().map(|t| t.row(i)).collect(),
            c: self.c.iter().map(|t| t.row(i)).collect(),
        }
    }

    /// Stack single-row states into one batched state
    pub fn stack(states: &[&LstmState]) -> Self {
        let layers = states[0].num_layers();
        let mut h = Vec::with_capacity(layers);
        let mut c = Vec::with_capacity(layers);
        for l in 0..layers {
            let hs: Vec<&Tensor> = states.iter().map(|s| &s.h[l]).collect();
            let cs: Vec<&Tensor> = states.iter().map(|s| &s.c[l]).collect();
            h.push(Tensor::stack_rows(&hs));
            c.push(Tensor::stack_rows(&cs));
        }
        Self { h, c }
    }

    /// Split a batched state into single-row states
    pub fn split(&self) -> Vec<LstmState> {
        (0..self.batch_size()).map(|i| self.row(i)).collect()
    }
}

/// One LSTM cell
#[derive(Clone, Debug)]
pub struct TrainableLstmCell {
    pub w_ih: Tensor,
    pub w_hh: Tensor,
    pub b_ih: Tensor,
    pub b_hh: Tensor,
    pub hidden_size: usize,
}

/// Values saved by [`TrainableLstmCell::forward`]
pub struct LstmCellCache {
    x: Tensor,
    h_prev: Tensor,
    c_prev: Tensor,
    i: Tensor,
    f: Tensor,
    g: Tensor,
    o: Tensor,
    tanh_c: Tensor,
}

/// Gradients of one cell backward call
pub struct LstmCellGradients {
    pub params: LstmCellGrads,
    pub x: Tensor,
    pub h_prev: Tensor,
    pub c_prev: Tensor,
}

/// Parameter gradients of one cell
#[derive(Clone, Debug)]
pub struct LstmCellGrads {
    pub w_ih: Tensor,
    pub w_hh: Tensor,
    pub b_ih: Tensor,
    pub b_hh: Tensor,
}

impl TrainableLstmCell {
    /// Uniform init in `[-1/√H, 1/√H]` for every weight and bias
    pub fn new(input_size: usize, hidden_size: usize, seed: u64) -> Self {
        let scale = 1.0 / (hidden_size as f32).sqrt();
        let gates = 4 * hidden_size;
        Self {
            w_ih: Tensor::new(
                random_init(input_size * gates, seed, scale),
                vec![input_size, gates],
            ),
            w_hh: Tensor::new(
                random_init(hidden_size * gates, seed.wrapping_add(1), scale),
                vec![hidden_size, gates],
            ),
            b_ih: Tensor::new(random_init(gates, seed.wrapping_add(2), scale), vec![gates]),
            b_hh: Tensor::new(random_init(gates, seed.wrapping_add(3), scale), vec![gates]),
            hidden_size,
        }
    }

    pub fn input_size(&self) -> usize {
        self.w_ih.shape[0]
    }

    /// One timestep: returns `(h', c', cache)`
    pub fn forward(&self, x: &Tensor, h: &Tensor, c: &Tensor) -> (Tensor, Tensor, LstmCellCache) {
        let hs = self.hidden_size;
        let z = x
            .matmul(&self.w_ih)
            .add(&self.b_ih)
            .add(&h.matmul(&self.w_hh))
            .add(&self.b_hh);

        let i = z.narrow_cols(0, hs).map(sigmoid);
        let f = z.narrow_cols(hs, hs).map(sigmoid);
        let g = z.narrow_cols(2 * hs, hs).map(f32::tanh);
        let o = z.narrow_cols(3 * hs, hs).map(sigmoid);

        let c_next = f.mul(c).add(&i.mul(&g));
        let tanh_c = c_next.map(f32::tanh);
        let h_next = o.mul(&tanh_c);

        let cache = LstmCellCache {
            x: x.clone(),
            h_prev: h.clone(),
            c_prev: c.clone(),
            i,
            f,
            g,
            o,
            tanh_c,
        };
        (h_next, c_next, cache)
    }

    /// Backpropagate `dh'` and `dc'` through one timestep
    pub fn backward(&self, dh: &Tensor, dc: &Tensor, cache: &LstmCellCache) -> LstmCellGradients {
        let one = |t: &Tensor| t.map(|v| 1.0 - v * v);
        let dc_total = dc.add(&dh.mul(&cache.o).mul(&one(&cache.tanh_c)));

        let d_o = dh.mul(&cache.tanh_c);
        let d_i = dc_total.mul(&cache.g);
        let d_g = dc_total.mul(&cache.i);
        let d_f = dc_total.mul(&cache.c_prev);
        let c_prev = dc_total.mul(&cache.f);

        let dz = sigmoid_backward(&d_i, &cache.i)
            .concat_cols(&sigmoid_backward(&d_f, &cache.f))
            .concat_cols(&tanh_backward(&d_g, &cache.g))
            .concat_cols(&sigmoid_backward(&d_o, &cache.o));

        let b = column_sums(&dz);
        LstmCellGradients {
            params: LstmCellGrads {
                w_ih: cache.x.transpose().matmul(&dz),
                w_hh: cache.h_prev.transpose().matmul(&dz),
                b_ih: b.clone(),
                b_hh: b,
            },
            x: dz.matmul(&self.w_ih.transpose()),
            h_prev: dz.matmul(&self.w_hh.transpose()),
            c_prev,
        }
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.w_ih, &self.w_hh, &self.b_ih, &self.b_hh]
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.w_ih, &mut self.w_hh, &mut self.b_ih, &mut self.b_hh]
    }
}

fn column_sums(x: &Tensor) -> Tensor {
    let cols = x.cols();
    let mut sums = vec![0.0; cols];
    for row in x.data.chunks(cols) {
        for (s, &v) in sums.iter_mut().zip(row) {
            *s += v;
        }
    }
    Tensor::new(sums, vec![cols])
}

impl LstmCellGrads {
    pub fn zeros_like(cell: &TrainableLstmCell) -> Self {
        Self {
            w_ih: Tensor::zeros(cell.w_ih.shape.clone()),
            w_hh: Tensor::zeros(cell.w_hh.shape.clone()),
            b_ih: Tensor::zeros(cell.b_ih.shape.clone()),
            b_hh: Tensor::zeros(cell.b_hh.shape.clone()),
        }
    }

    pub fn accumulate(&mut self, other: &LstmCellGrads) {
        self.w_ih.add_assign(&other.w_ih);
        self.w_hh.add_assign(&other.w_hh);
        self.b_ih.add_assign(&other.b_ih);
        self.b_hh.add_assign(&other.b_hh);
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        vec![&self.w_ih, &self.w_hh, &self.b_ih, &self.b_hh]
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.w_ih, &mut self.w_hh, &mut self.b_ih, &mut self.b_hh]
    }
}

/// Stacked LSTM
///
/// Dropout sits between layers only: it is applied to the output of every
/// layer except the top one before it feeds the next layer. With a single
/// layer the rate is ignored.
#[derive(Clone, Debug)]
pub struct TrainableLstm {
    pub layers: Vec<TrainableLstmCell>,
    pub dropout: TrainableDropout,
}

/// Per-timestep cache of the stack
pub struct LstmStepCache {
    cells: Vec<LstmCellCache>,
    dropouts: Vec<DropoutCache>,
}

/// Accumulated parameter gradients of the stack
#[derive(Clone, Debug)]
pub struct LstmGrads {
    pub layers: Vec<LstmCellGrads>,
}

impl TrainableLstm {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f32,
        seed: u64,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|l| {
                let input = if l == 0 { input_size } else { hidden_size };
                TrainableLstmCell::new(input, hidden_size, seed.wrapping_add(l as u64 * 4))
            })
            .collect();
        let rate = if num_layers > 1 { dropout } else { 0.0 };
        Self {
            layers,
            dropout: TrainableDropout::new(rate),
        }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.layers[0].hidden_size
    }

    pub fn input_size(&self) -> usize {
        self.layers[0].input_size()
    }

    /// Zero state for a batch
    pub fn zero_state(&self, batch: usize) -> LstmState {
        LstmState::zeros(self.num_layers(), batch, self.hidden_size())
    }

    /// Run every layer for one timestep
    ///
    /// Returns the top layer's output, the new state and the cache.
    pub fn step(
        &self,
        x: &Tensor,
        state: &LstmState,
        ctx: &mut ExecutionContext,
    ) -> (Tensor, LstmState, LstmStepCache) {
        let mut input = x.clone();
        let mut h = Vec::with_capacity(self.num_layers());
        let mut c = Vec::with_capacity(self.num_layers());
        let mut cells = Vec::with_capacity(self.num_layers());
        let mut dropouts = Vec::with_capacity(self.num_layers().saturating_sub(1));

        for (l, cell) in self.layers.iter().enumerate() {
            let (h_next, c_next, cache) = cell.forward(&input, &state.h[l], &state.c[l]);
            cells.push(cache);
            if l + 1 < self.num_layers() {
                let (dropped, d_cache) = self.dropout.forward(&h_next, ctx);
                dropouts.push(d_cache);
                input = dropped;
            } else {
                input = h_next.clone();
            }
            h.push(h_next);
            c.push(c_next);
        }

        (input, LstmState { h, c }, LstmStepCache { cells, dropouts })
    }

    /// Backward through one timestep of the stack
    ///
    /// `d_out` is the gradient on the top output and `d_state` the gradient on
    /// the new state (from the next timestep). Parameter gradients are added to
    /// `grads`; the input gradient and the previous-state gradient are returned.
    pub fn step_backward(
        &self,
        d_out: &Tensor,
        d_state: &LstmState,
        cache: &LstmStepCache,
        grads: &mut LstmGrads,
    ) -> (Tensor, LstmState) {
        let n = self.num_layers();
        let mut d_prev_h = vec![Tensor::zeros(vec![0]); n];
        let mut d_prev_c = vec![Tensor::zeros(vec![0]); n];
        let mut from_above = d_out.clone();

        for l in (0..n).rev() {
            let dh = d_state.h[l].add(&from_above);
            let cell_grads = self.layers[l].backward(&dh, &d_state.c[l], &cache.cells[l]);
            grads.layers[l].accumulate(&cell_grads.params);
            d_prev_h[l] = cell_grads.h_prev;
            d_prev_c[l] = cell_grads.c_prev;
            from_above = if l > 0 {
                self.dropout.backward(&cell_grads.x, &cache.dropouts[l - 1])
            } else {
                cell_grads.x
            };
        }

        (
            from_above,
            LstmState {
                h: d_prev_h,
                c: d_prev_c,
            },
        )
    }

    pub fn parameters(&self) -> Vec<&Tensor> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect()
    }
}

impl LstmGrads {
    pub fn zeros_like(lstm: &TrainableLstm) -> Self {
        Self {
            layers: lstm.layers.iter().map(LstmCellGrads::zeros_like).collect(),
        }
    }

    pub fn tensors(&self) -> Vec<&Tensor> {
        self.layers.iter().flat_map(|l| l.tensors()).collect()
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        self.layers.iter_mut().flat_map(|l| l.tensors_mut()).collect()
    }
}
