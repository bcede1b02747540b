//! The binarization operator and its straight-through gradient.
//!
//! The forward value is a step function, which has a zero derivative almost everywhere.
//! Training therefore uses a clipped straight-through estimator: for gradient purposes
//! the operator behaves like `clamp(x, -h, h)`, passing the upstream gradient unchanged
//! where `|x| <= h` and blocking it where `|x| > h`.
//!
//! # Sign convention
//!
//! Zero is binarized to `+h`: `binarize_value(0.0, h) == h`. NaN compares false against
//! zero and therefore maps to `-h`, keeping the operator total.

use crate::ops::FnTen32To;
use crate::tensors::{Ten32, Tensor, TensorFloat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Forward value of the operator for one element.
#[inline]
#[must_use]
pub fn binarize_value(x: TensorFloat, h: TensorFloat) -> TensorFloat {
    if x >= 0.0 { h } else { -h }
}

/// Surrogate derivative for one element: `upstream` inside `[-h, h]`, zero outside.
#[inline]
#[must_use]
pub fn surrogate_grad(x: TensorFloat, h: TensorFloat, upstream: TensorFloat) -> TensorFloat {
    if x.abs() <= h { upstream } else { 0.0 }
}

/// Binarizes `latent` to `±h` element-wise.
///
/// The input is left untouched; the returned view is a fresh tensor.
///
/// # Returns
/// - Output tensor whose elements are exactly `h` or `-h`
/// - Backward function applying [`surrogate_grad`] against the saved latent values
///
/// # Example
/// ```rust
/// use briny_bnn::quant::binarize::binarize;
/// use briny_bnn::tensor;
///
/// let w = tensor!([0.3, -0.8, 0.0, 1.5]);
/// let (b, back) = binarize(&w, 1.0);
/// assert_eq!(b.data, vec![1.0, -1.0, 1.0, 1.0]);
/// assert_eq!(back(&tensor!([1.0, 1.0, 1.0, 1.0])).data, vec![1.0, 1.0, 1.0, 0.0]);
/// ```
pub fn binarize(latent: &Ten32, h: TensorFloat) -> (Ten32, Box<FnTen32To>) {
    let data = latent.data.par_iter().map(|&x| binarize_value(x, h)).collect();
    let out = Tensor::new(latent.shape.clone(), data);

    let saved = latent.data.clone();
    let back = move |grad_output: &Ten32| {
        assert_eq!(grad_output.len(), saved.len(), "binarize gradient shape mismatch");
        let grad = grad_output
            .data
            .par_iter()
            .zip(saved.par_iter())
            .map(|(&dy, &x)| surrogate_grad(x, h, dy))
            .collect();
        Tensor::new(grad_output.shape.clone(), grad)
    };

    (out, Box::new(back))
}

/// How a latent weight is turned into the tensor used for compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightTransform {
    /// Quantize to `±h` with the straight-through gradient.
    #[default]
    Binarize,
    /// Use the latent weight as-is, with an identity gradient.
    Identity,
}

impl WeightTransform {
    /// Maps a layer's binarize flag onto a transform.
    #[must_use]
    pub const fn from_flag(binarize: bool) -> Self {
        if binarize { Self::Binarize } else { Self::Identity }
    }

    /// Applies the transform, returning the compute view and its backward function.
    pub fn apply(self, latent: &Ten32, h: TensorFloat) -> (Ten32, Box<FnTen32To>) {
        match self {
            Self::Binarize => binarize(latent, h),
            Self::Identity => (latent.clone(), Box::new(|grad: &Ten32| grad.clone())),
        }
    }
}
