//! Neural Network Layers
//!
//! The trainable building blocks of the encoder and decoder. Each layer
//! provides both a forward and a backward pass.
//!
//! ## Layers
//!
//! - **activation**: sigmoid and tanh with derivatives
//! - **linear**: fully connected layer, optional bias
//! - **embedding**: token lookup table
//! - **dropout**: inverted dropout driven by the execution context
//! - **lstm**: LSTM cell and stacked LSTM, one timestep at a time
//! - **attention**: additive attention over encoder outputs
//!
//! ## Design Pattern
//!
//! Each trainable layer follows a consistent pattern:
//!
//! ```rust,ignore
//! pub struct TrainableLayer {
//!     // Parameters (weights, biases, etc.)
//! }
//!
//! impl TrainableLayer {
//!     pub fn new(...) -> Self { }
//!     pub fn forward(&self, x: &Tensor) -> (Tensor, Cache) { }
//!     pub fn backward(&self, grad: &Tensor, cache: &Cache) -> Gradients { }
//!     pub fn parameters(&self) -> Vec<&Tensor> { }
//! }
//! ```
//!
//! Recurrent layers return one cache per timestep; the caller keeps them and
//! walks them in reverse for backpropagation through time. Parameter
//! gradients of layers that run many times per batch are summed into a
//! `*ParamGrads` / `*Grads` struct whose `tensors()` order matches
//! `parameters()`.

pub mod activation;
pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod linear;
pub mod lstm;

pub use activation::{sigmoid, sigmoid_backward, tanh_backward};
pub use attention::{
    apply_attention, AttentionCache, AttentionGradients, AttentionParamGrads, TrainableAttention,
};
pub use dropout::{DropoutCache, TrainableDropout};
pub use embedding::TrainableEmbedding;
pub use linear::{random_init, LinearCache, LinearGradients, LinearParamGrads, TrainableLinear};
pub use lstm::{LstmGrads, LstmState, LstmStepCache, TrainableLstm, TrainableLstmCell};
