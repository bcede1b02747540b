use crate::tensors::{Ten32, Tensor};
use rayon::prelude::*;

/// Transposes `[n, c, h, w]` into `[n, h, w, c]`.
///
/// # Panics
/// Panics if the input is not rank 4.
pub fn nchw_to_nhwc(input: &Ten32) -> Ten32 {
    assert_eq!(input.rank(), 4, "expected NCHW, got {:?}", input.shape);
    let (n, c, h, w) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let data = (0..input.len())
        .into_par_iter()
        .map(|i| {
            // i indexes the NHWC output
            let ci = i % c;
            let x = (i / c) % w;
            let y = (i / (c * w)) % h;
            let b = i / (c * w * h);
            input.data[((b * c + ci) * h + y) * w + x]
        })
        .collect();
    Tensor::new(vec![n, h, w, c], data)
}

/// Transposes `[n, h, w, c]` into `[n, c, h, w]`.
///
/// # Panics
/// Panics if the input is not rank 4.
pub fn nhwc_to_nchw(input: &Ten32) -> Ten32 {
    assert_eq!(input.rank(), 4, "expected NHWC, got {:?}", input.shape);
    let (n, h, w, c) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let data = (0..input.len())
        .into_par_iter()
        .map(|i| {
            // i indexes the NCHW output
            let x = i % w;
            let y = (i / w) % h;
            let ci = (i / (w * h)) % c;
            let b = i / (w * h * c);
            input.data[((b * h + y) * w + x) * c + ci]
        })
        .collect();
    Tensor::new(vec![n, c, h, w], data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposes_are_inverse() {
        let nchw = Tensor::new(vec![2, 3, 2, 2], (0..24).map(|v| v as f32).collect());
        let nhwc = nchw_to_nhwc(&nchw);
        assert_eq!(nhwc.shape, vec![2, 2, 2, 3]);
        // first pixel gathers one value from each channel plane
        assert_eq!(&nhwc.data[..3], &[0.0, 4.0, 8.0]);
        assert_eq!(nhwc_to_nchw(&nhwc), nchw);
    }
}
