use crate::tensors::{Ten32, TensorFloat, WithGrad};

/// Performs one step of stochastic gradient descent (SGD) on the given parameter tensor.
///
/// # Formula
/// $$ w := w - \\text{lr} \\cdot \\frac{\\partial L}{\\partial w} $$
///
/// # Behavior
/// - Updates `w.value` in-place
/// - Zeros out `w.grad` after update (gradient reset step)
///
/// # Panics
/// Panics if the value and gradient shapes differ.
pub fn sgd(w: &mut WithGrad<Ten32>, lr: TensorFloat) {
    assert_eq!(w.value.shape, w.grad.shape, "sgd shape mismatch");
    for (param, grad) in w.value.data.iter_mut().zip(&w.grad.data) {
        *param -= lr * *grad;
    }
    for grad in &mut w.grad.data {
        *grad = 0.0;
    }
}
