//! Parallel CPU backend tensor operations
//!
//! # CPU Backend
//!
//! This module provides the CPU implementations of the tensor operations used by the
//! binary layers during training and inference. The public entry points in
//! [`crate::backprop`] forward here.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Row- or element-independent work splits, so results do not depend on scheduling
//!
//! ## Implemented Ops
//!
//! - `matmul`: Matrix multiplication
//! - `conv2d`: NHWC 2D convolution with strides, padding and dilation
//! - `depthwise_conv2d`: per-channel NHWC 2D convolution with a depth multiplier
//! - `bias_add`: bias broadcast along one axis
//! - `relu` / `tanh` / `sigmoid`: activations with forward and backward pass
//! - `mse_loss`: Mean squared error loss with autograd
//! - `sgd`: In-place stochastic gradient descent step
//! - `nchw_to_nhwc` / `nhwc_to_nchw`: data layout transposes
//!
//! ## Design Goals
//!
//! - Deterministic results (given deterministic input)
//! - Modular: one operation per file

mod activation;
pub use self::activation::{relu, sigmoid, tanh};

mod bias;
pub use self::bias::bias_add;

mod conv2d;
pub use self::conv2d::{Conv2dGeometry, Padding, Window, conv2d};

mod depthwise;
pub use self::depthwise::depthwise_conv2d;

mod layout;
pub use self::layout::{nchw_to_nhwc, nhwc_to_nchw};

mod matmul;
pub use self::matmul::matmul;

mod mse_loss;
pub use self::mse_loss::mse_loss;

mod sgd;
pub use self::sgd::sgd;
