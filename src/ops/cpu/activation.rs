use crate::ops::FnTen32To;
use crate::tensors::{Ten32, Tensor, TensorFloat};
use rayon::prelude::*;

/// Applies the `ReLU` activation function element-wise: `max(0, x)`.
///
/// # Returns
/// - Output tensor of same shape
/// - Backward function passing the upstream gradient only where the input is positive
pub fn relu(input: &Ten32) -> (Ten32, Box<FnTen32To>) {
    let out = map(input, |x| if x > 0.0 { x } else { 0.0 });
    let input_data = input.data.clone();

    let back = move |grad_output: &Ten32| {
        zip_map(grad_output, &input_data, |dy, x| if x > 0.0 { dy } else { 0.0 })
    };

    (out, Box::new(back))
}

/// Applies `tanh` element-wise.
///
/// The backward pass uses the saved output: `dy * (1 - y²)`.
pub fn tanh(input: &Ten32) -> (Ten32, Box<FnTen32To>) {
    let out = map(input, TensorFloat::tanh);
    let saved = out.data.clone();

    let back = move |grad_output: &Ten32| zip_map(grad_output, &saved, |dy, y| dy * (1.0 - y * y));

    (out, Box::new(back))
}

/// Applies the logistic sigmoid element-wise.
///
/// The backward pass uses the saved output: `dy * y * (1 - y)`.
pub fn sigmoid(input: &Ten32) -> (Ten32, Box<FnTen32To>) {
    let out = map(input, |x| 1.0 / (1.0 + (-x).exp()));
    let saved = out.data.clone();

    let back = move |grad_output: &Ten32| zip_map(grad_output, &saved, |dy, y| dy * y * (1.0 - y));

    (out, Box::new(back))
}

fn map(input: &Ten32, f: impl Fn(TensorFloat) -> TensorFloat + Sync) -> Ten32 {
    let data = input.data.par_iter().map(|&x| f(x)).collect();
    Tensor::new(input.shape.clone(), data)
}

fn zip_map(
    grad: &Ten32,
    saved: &[TensorFloat],
    f: impl Fn(TensorFloat, TensorFloat) -> TensorFloat + Sync,
) -> Ten32 {
    assert_eq!(grad.len(), saved.len(), "activation gradient shape mismatch");
    let data = grad
        .data
        .par_iter()
        .zip(saved.par_iter())
        .map(|(&dy, &s)| f(dy, s))
        .collect();
    Tensor::new(grad.shape.clone(), data)
}
