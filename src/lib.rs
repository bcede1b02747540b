//! briny_bnn: binarized-weight (BinaryNet) layers in Rust.
//!
//! Layers keep full-precision *latent* weights for training but run every forward and
//! backward pass on a copy binarized to `±H`. Gradients reach the latent weights through
//! a clipped straight-through estimator, and a range constraint keeps the latent
//! weights inside `[-H, H]` where that estimator is non-zero.
//!
//! # Features
//!
//! - Multi-dimensional tensor management with gradient support.
//! - CPU operations (matmul, convolutions, activations) with manual backpropagation closures.
//! - Binarized dense, convolutional and depthwise-separable layers sharing one template.
//! - Glorot-derived scale factors and learning-rate multipliers.
//! - JSON layer configurations that round-trip.
//!
//! # Modules
//!
//! - [`tensors`] — Core tensor data structures and operations.
//! - [`backprop`] — Differentiable operations and autograd utilities.
//! - [`quant`] — Binarization operator, scale resolution and range constraint.
//! - [`layers`] — Binarized layers and the layer lifecycle.
//! - [`optim`] — Optimizers honouring learning-rate multipliers and constraints.
//! - [`error`] — Error type shared by the fallible APIs.
//!
//! # Example
//!
//! ```rust
//! use briny_bnn::backprop::mse_loss;
//! use briny_bnn::layers::{BinaryDense, Layer};
//! use briny_bnn::optim::Sgd;
//! use briny_bnn::tensor;
//!
//! let mut layer = BinaryDense::new(1).with_seed(1);
//! let sgd = Sgd::new(0.01);
//! let (x, y) = (tensor!([[1.0, -1.0]]), tensor!([[0.5]]));
//!
//! for _ in 0..10 {
//!     let fwd = layer.forward(&x, true).unwrap();
//!     let (_, loss_back) = mse_loss(&fwd.output, &y);
//!     let grads = (fwd.back)(&loss_back(1.0));
//!     layer.accumulate_grads(&grads).unwrap();
//!     sgd.step(&mut layer);
//! }
//! ```

pub mod backprop;
pub mod error;
pub mod layers;
pub mod ops;
pub mod optim;
pub mod quant;
pub mod tensors;

pub use error::{BnnError, Result};
