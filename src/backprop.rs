//! Differentiable operations and autograd utilities.
//!
//! # Backpropagation Primitives
//!
//! Provides the operations the binarized layers are assembled from, each with built-in
//! autograd support.
//!
//! **Key Features:**
//! - **Matrix Multiplication:** m×k · k×n product with gradient closures.
//! - **Convolution:** NHWC 2D and depthwise convolution with strides, padding and dilation.
//! - **Bias and Activations:** bias broadcast plus ReLU, tanh and sigmoid.
//! - **Loss Computation (MSE):** Mean Squared Error with gradient generator.
//! - **Optimizer (SGD):** In-place parameter update with gradient reset.
//!
//! ## Autograd Pattern
//!
//! Each operation follows a simple pattern:
//! 1. **Inputs** are references to `Ten32` values.
//! 2. **Forward Pass** computes an output `Ten32`.
//! 3. **Backward Pass** returns a boxed closure capturing minimal cloned data to compute gradients.
//! 4. **Gradient Application** uses these results to update `WithGrad` wrappers.
//!
//! ## Usage Guidelines
//!
//! - Operations **panic** on shape mismatches; layers validate shapes before calling them.
//! - The backward closures implement `Fn`, allowing multiple invocations if needed.
//! - All closures are `Send + Sync`.

use crate::ops::cpu::{self, Conv2dGeometry};
use crate::ops::{FnF32Ten32, FnTen32To, FnToDoubleTen32};
use crate::tensors::{Ten32, TensorFloat, WithGrad};

/// Applies the ReLU activation (Rectified Linear Unit): `max(0, x)` elementwise.
///
/// # Returns
/// - `out`: Tensor with negatives zeroed.
/// - `back`: Closure mapping `dL/d(out)` to `dL/d(input)` by passing gradients only where input > 0.
///
/// # Example
/// ```rust
/// use briny_bnn::tensor;
///
/// let input = tensor!([[3.0, -3.0], [9.0, 0.0]]);
/// let (out, back) = briny_bnn::backprop::relu(&input);
/// assert_eq!(out.data, vec![3.0, 0.0, 9.0, 0.0]);
/// let grad_in = back(&tensor!([[2.0, 4.0], [6.0, 3.0]]));
/// assert_eq!(grad_in.data, vec![2.0, 0.0, 6.0, 0.0]);
/// ```
pub fn relu(input: &Ten32) -> (Ten32, Box<FnTen32To>) {
    cpu::relu(input)
}

/// Applies `tanh` elementwise.
pub fn tanh(input: &Ten32) -> (Ten32, Box<FnTen32To>) {
    cpu::tanh(input)
}

/// Applies the logistic sigmoid elementwise.
pub fn sigmoid(input: &Ten32) -> (Ten32, Box<FnTen32To>) {
    cpu::sigmoid(input)
}

/// Performs matrix multiplication of two 2D tensors: `a` (m×k) · `b` (k×n).
///
/// # Returns
/// - `out`: Product tensor (m×n).
/// - `back`: Closure that given `dL/d(out)` returns `(dL/d(a), dL/d(b))`.
///
/// # Panics
/// Panics if internal dimensions do not match (`a.shape[1] != b.shape[0]`).
pub fn matmul(a: &Ten32, b: &Ten32) -> (Ten32, Box<FnToDoubleTen32>) {
    cpu::matmul(a, b)
}

/// 2D convolution of an NHWC input with an HWIO kernel.
///
/// # Returns
/// - `out`: `[n, oh, ow, filters]`.
/// - `back`: Closure that given `dL/d(out)` returns `(dL/d(input), dL/d(kernel))`.
///
/// # Panics
/// Panics on rank or channel mismatches and when the output would be empty.
pub fn conv2d(input: &Ten32, kernel: &Ten32, geometry: Conv2dGeometry) -> (Ten32, Box<FnToDoubleTen32>) {
    cpu::conv2d(input, kernel, geometry)
}

/// Depthwise 2D convolution of an NHWC input with a `[kh, kw, c, multiplier]` kernel.
///
/// # Panics
/// Panics on rank or channel mismatches and when the output would be empty.
pub fn depthwise_conv2d(input: &Ten32, kernel: &Ten32, geometry: Conv2dGeometry) -> (Ten32, Box<FnToDoubleTen32>) {
    cpu::depthwise_conv2d(input, kernel, geometry)
}

/// Adds `bias` along `axis`; the backward closure returns `(dL/d(input), dL/d(bias))`.
///
/// # Panics
/// Panics if the bias length differs from `input.shape[axis]`.
pub fn bias_add(input: &Ten32, bias: &Ten32, axis: usize) -> (Ten32, Box<FnToDoubleTen32>) {
    cpu::bias_add(input, bias, axis)
}

/// Computes Mean Squared Error (MSE) loss: `mean((prediction - target)^2)`.
///
/// # Returns
/// - Scalar loss value
/// - Closure that maps `dL/dloss` into gradient tensor shape
///
/// # Panics
/// Panics if shapes of `prediction` and `target` differ.
pub fn mse_loss(prediction: &Ten32, target: &Ten32) -> (TensorFloat, Box<FnF32Ten32>) {
    cpu::mse_loss(prediction, target)
}

/// Performs an in-place Stochastic Gradient Descent (SGD) update.
///
/// Applies: `param = param - learning_rate * gradient` and then zeros gradient.
pub fn sgd(w: &mut WithGrad<Ten32>, lr: TensorFloat) {
    cpu::sgd(w, lr);
}
