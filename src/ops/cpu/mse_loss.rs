use crate::ops::FnF32Ten32;
use crate::tensors::{Ten32, Tensor, TensorFloat};
use rayon::prelude::*;

/// Computes the mean squared error (MSE) between predictions and targets,
/// returning both the scalar loss and a gradient function.
///
/// # Formula
/// $$ L = \\frac{1}{n} \\sum_i (y_i - t_i)^2 $$
///
/// # Returns
/// - Scalar loss
/// - Backward function mapping upstream scalar gradient `dL` to a tensor of shape `prediction`
///
/// # Notes
/// - Forward and backward passes are parallelized with `rayon`
///
/// # Panics
/// Panics if the shapes of `prediction` and `target` differ.
pub fn mse_loss(prediction: &Ten32, target: &Ten32) -> (TensorFloat, Box<FnF32Ten32>) {
    assert_eq!(prediction.shape, target.shape, "mse_loss shape mismatch");
    let n = prediction.len() as TensorFloat;

    let loss = prediction
        .data
        .par_iter()
        .zip(&target.data)
        .map(|(&y, &t)| (y - t).powi(2))
        .sum::<TensorFloat>()
        / n;

    let shape = prediction.shape.clone();
    let pred_data = prediction.data.clone();
    let target_data = target.data.clone();

    let back = move |grad_output: TensorFloat| {
        let grad = pred_data
            .par_iter()
            .zip(&target_data)
            .map(|(&y, &t)| 2.0 * (y - t) * grad_output / n)
            .collect();

        Tensor::new(shape.clone(), grad)
    };

    (loss, Box::new(back))
}
