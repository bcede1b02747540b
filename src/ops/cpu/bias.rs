use crate::ops::FnToDoubleTen32;
use crate::tensors::{Ten32, Tensor};
use rayon::prelude::*;

/// Adds a 1D `bias` to `input` along `axis`.
///
/// # Returns
/// - Output tensor of the input's shape
/// - Backward function mapping `dL/d(out)` to `(dL/d(input), dL/d(bias))`; the bias
///   gradient sums every other axis
///
/// # Panics
/// - If `axis` is out of range or `bias.len()` differs from `input.shape[axis]`.
pub fn bias_add(input: &Ten32, bias: &Ten32, axis: usize) -> (Ten32, Box<FnToDoubleTen32>) {
    assert!(axis < input.rank(), "bias axis {axis} out of range for {:?}", input.shape);
    let channels = input.shape[axis];
    assert_eq!(bias.len(), channels, "bias length mismatch");
    let inner: usize = input.shape[axis + 1..].iter().product();

    let mut data = input.data.clone();
    data.par_iter_mut().enumerate().for_each(|(i, v)| {
        *v += bias.data[(i / inner) % channels];
    });
    let out = Tensor::new(input.shape.clone(), data);

    let shape = input.shape.clone();
    let back = move |grad: &Ten32| {
        assert_eq!(grad.shape, shape, "bias gradient shape mismatch");
        let mut grad_bias = vec![0.0; channels];
        for (i, g) in grad.data.iter().enumerate() {
            grad_bias[(i / inner) % channels] += g;
        }
        (grad.clone(), Tensor::new(vec![channels], grad_bias))
    };

    (out, Box::new(back))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_axis_bias() {
        let input = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let bias = Tensor::new(vec![2], vec![0.5, -0.5]);
        let (out, back) = bias_add(&input, &bias, 1);
        assert_eq!(out.data, vec![1.5, 1.5, 3.5, 3.5]);
        let (gi, gb) = back(&Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(gi.data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(gb.data, vec![4.0, 6.0]);
    }

    #[test]
    fn channel_axis_one_for_nchw() {
        let input = Tensor::new(vec![1, 2, 1, 2], vec![0.0; 4]);
        let bias = Tensor::new(vec![2], vec![1.0, 2.0]);
        let (out, _) = bias_add(&input, &bias, 1);
        assert_eq!(out.data, vec![1.0, 1.0, 2.0, 2.0]);
    }
}
