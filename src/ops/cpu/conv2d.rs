use crate::ops::FnToDoubleTen32;
use crate::tensors::{Ten32, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Spatial padding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// No padding; windows must fit entirely inside the input.
    #[default]
    Valid,
    /// Zero padding so that `out = ceil(in / stride)`.
    Same,
}

/// Output length and leading padding of one spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub out: usize,
    pub pad_before: usize,
}

/// Stride, dilation and padding shared by the convolution kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub strides: (usize, usize),
    pub dilation: (usize, usize),
    pub padding: Padding,
}

impl Default for Conv2dGeometry {
    fn default() -> Self {
        Self {
            strides: (1, 1),
            dilation: (1, 1),
            padding: Padding::Valid,
        }
    }
}

impl Conv2dGeometry {
    /// Computes the window of one axis.
    ///
    /// `same` padding follows TensorFlow: the total padding is split with the smaller
    /// half before the data.
    #[must_use]
    pub fn window(input: usize, kernel: usize, stride: usize, dilation: usize, padding: Padding) -> Window {
        let effective = kernel.saturating_sub(1) * dilation + 1;
        match padding {
            Padding::Valid => Window {
                out: if input >= effective {
                    (input - effective) / stride + 1
                } else {
                    0
                },
                pad_before: 0,
            },
            Padding::Same => {
                let out = input.div_ceil(stride);
                let needed = if out == 0 {
                    0
                } else {
                    ((out - 1) * stride + effective).saturating_sub(input)
                };
                Window {
                    out,
                    pad_before: needed / 2,
                }
            }
        }
    }

    /// Windows of the height and width axes.
    #[must_use]
    pub fn windows(&self, in_h: usize, in_w: usize, kh: usize, kw: usize) -> (Window, Window) {
        (
            Self::window(in_h, kh, self.strides.0, self.dilation.0, self.padding),
            Self::window(in_w, kw, self.strides.1, self.dilation.1, self.padding),
        )
    }
}

/// Maps an output coordinate plus kernel tap to an input coordinate, or `None` if it
/// falls into the padding.
#[inline]
pub(super) fn source_index(out: usize, tap: usize, stride: usize, dilation: usize, pad: usize, len: usize) -> Option<usize> {
    (out * stride + tap * dilation)
        .checked_sub(pad)
        .filter(|&i| i < len)
}

/// Performs a 2D convolution of an NHWC `input` with an HWIO `kernel`.
///
/// # Shapes
/// - `input`: `[n, h, w, c]`
/// - `kernel`: `[kh, kw, c, f]`
/// - output: `[n, oh, ow, f]` with `oh`/`ow` given by [`Conv2dGeometry::windows`]
///
/// # Returns
/// - Output tensor
/// - Backward function mapping `dL/d(out)` to `(dL/d(input), dL/d(kernel))`
///
/// # Optimizations
/// - Forward and input gradient parallelise over output rows and images respectively
/// - Kernel gradient parallelises over kernel rows, each summed in a fixed order
///
/// # Panics
/// - If ranks or channel counts mismatch, a stride or dilation is zero, or the output
///   would be empty.
pub fn conv2d(input: &Ten32, kernel: &Ten32, geometry: Conv2dGeometry) -> (Ten32, Box<FnToDoubleTen32>) {
    assert_eq!(input.rank(), 4, "conv2d input must be NHWC, got {:?}", input.shape);
    assert_eq!(kernel.rank(), 4, "conv2d kernel must be HWIO, got {:?}", kernel.shape);
    let (n, h, w, c) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let (kh, kw, kc, f) = (kernel.shape[0], kernel.shape[1], kernel.shape[2], kernel.shape[3]);
    assert_eq!(c, kc, "conv2d channel mismatch");
    let (sh, sw) = geometry.strides;
    let (dh, dw) = geometry.dilation;
    assert!(sh > 0 && sw > 0 && dh > 0 && dw > 0, "conv2d strides and dilation must be positive");

    let (wy, wx) = geometry.windows(h, w, kh, kw);
    let (oh, ow) = (wy.out, wx.out);
    assert!(n * oh * ow * f > 0, "conv2d output is empty");

    let mut out = vec![0.0; n * oh * ow * f];
    out.par_chunks_mut(ow * f).enumerate().for_each(|(row, out_row)| {
        let b = row / oh;
        let y = row % oh;
        for x in 0..ow {
            let acc = &mut out_row[x * f..(x + 1) * f];
            for ky in 0..kh {
                let Some(iy) = source_index(y, ky, sh, dh, wy.pad_before, h) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = source_index(x, kx, sw, dw, wx.pad_before, w) else {
                        continue;
                    };
                    let in_base = ((b * h + iy) * w + ix) * c;
                    let k_base = (ky * kw + kx) * c * f;
                    for ci in 0..c {
                        let v = input.data[in_base + ci];
                        let k_row = &kernel.data[k_base + ci * f..k_base + (ci + 1) * f];
                        for (a, k) in acc.iter_mut().zip(k_row) {
                            *a += v * k;
                        }
                    }
                }
            }
        }
    });
    let out = Tensor::new(vec![n, oh, ow, f], out);

    let in_val = input.data.clone();
    let k_val = kernel.data.clone();

    let back = move |grad: &Ten32| {
        assert_eq!(grad.shape, [n, oh, ow, f], "conv2d gradient shape mismatch");

        let mut grad_in = vec![0.0; n * h * w * c];
        if h * w * c > 0 {
            grad_in.par_chunks_mut(h * w * c).enumerate().for_each(|(b, img)| {
                for y in 0..oh {
                    for x in 0..ow {
                        let g = &grad.data[((b * oh + y) * ow + x) * f..][..f];
                        for ky in 0..kh {
                            let Some(iy) = source_index(y, ky, sh, dh, wy.pad_before, h) else {
                                continue;
                            };
                            for kx in 0..kw {
                                let Some(ix) = source_index(x, kx, sw, dw, wx.pad_before, w) else {
                                    continue;
                                };
                                let k_base = (ky * kw + kx) * c * f;
                                for ci in 0..c {
                                    let k_row = &k_val[k_base + ci * f..k_base + (ci + 1) * f];
                                    img[(iy * w + ix) * c + ci] +=
                                        g.iter().zip(k_row).map(|(g, k)| g * k).sum::<f32>();
                                }
                            }
                        }
                    }
                }
            });
        }

        // one chunk per (ky, kx, ci) kernel row
        let mut grad_k = vec![0.0; kh * kw * c * f];
        grad_k.par_chunks_mut(f).enumerate().for_each(|(r, k_row)| {
            let ci = r % c;
            let kx = (r / c) % kw;
            let ky = r / (c * kw);
            for b in 0..n {
                for y in 0..oh {
                    let Some(iy) = source_index(y, ky, sh, dh, wy.pad_before, h) else {
                        continue;
                    };
                    for x in 0..ow {
                        let Some(ix) = source_index(x, kx, sw, dw, wx.pad_before, w) else {
                            continue;
                        };
                        let v = in_val[((b * h + iy) * w + ix) * c + ci];
                        let g = &grad.data[((b * oh + y) * ow + x) * f..][..f];
                        for (k, g) in k_row.iter_mut().zip(g) {
                            *k += v * g;
                        }
                    }
                }
            }
        });

        (
            Tensor::new(vec![n, h, w, c], grad_in),
            Tensor::new(vec![kh, kw, c, f], grad_k),
        )
    };

    (out, Box::new(back))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_and_same_windows() {
        assert_eq!(Conv2dGeometry::window(5, 3, 1, 1, Padding::Valid), Window { out: 3, pad_before: 0 });
        assert_eq!(Conv2dGeometry::window(5, 3, 2, 1, Padding::Valid), Window { out: 2, pad_before: 0 });
        assert_eq!(Conv2dGeometry::window(5, 3, 1, 2, Padding::Valid), Window { out: 1, pad_before: 0 });
        assert_eq!(Conv2dGeometry::window(2, 3, 1, 1, Padding::Valid).out, 0);
        assert_eq!(Conv2dGeometry::window(5, 3, 1, 1, Padding::Same), Window { out: 5, pad_before: 1 });
        // total padding 1 goes after the data
        assert_eq!(Conv2dGeometry::window(4, 2, 1, 1, Padding::Same), Window { out: 4, pad_before: 0 });
        assert_eq!(Conv2dGeometry::window(5, 3, 2, 1, Padding::Same), Window { out: 3, pad_before: 1 });
    }

    #[test]
    fn conv2d_single_channel_valid() {
        // 3x3 image, 2x2 kernel of ones
        let input = Tensor::new(vec![1, 3, 3, 1], (1..=9).map(|v| v as f32).collect());
        let kernel = Tensor::new(vec![2, 2, 1, 1], vec![1.0; 4]);
        let (out, back) = conv2d(&input, &kernel, Conv2dGeometry::default());
        assert_eq!(out.shape, vec![1, 2, 2, 1]);
        assert_eq!(out.data, vec![12.0, 16.0, 24.0, 28.0]);

        let (grad_in, grad_k) = back(&Tensor::new(vec![1, 2, 2, 1], vec![1.0; 4]));
        // each input pixel counted once per window covering it
        assert_eq!(grad_in.data, vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]);
        // each kernel tap sees the sum of one 2x2 input block
        assert_eq!(grad_k.data, vec![12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn conv2d_same_padding_keeps_spatial_size() {
        let input = Tensor::new(vec![1, 3, 3, 1], vec![1.0; 9]);
        let kernel = Tensor::new(vec![3, 3, 1, 1], vec![1.0; 9]);
        let geometry = Conv2dGeometry {
            padding: Padding::Same,
            ..Default::default()
        };
        let (out, _) = conv2d(&input, &kernel, geometry);
        assert_eq!(out.shape, vec![1, 3, 3, 1]);
        assert_eq!(out.data, vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn conv2d_mixes_channels_into_filters() {
        // 1x1 spatial, two channels, two filters: a plain matrix product
        let input = Tensor::new(vec![1, 1, 1, 2], vec![2.0, 3.0]);
        let kernel = Tensor::new(vec![1, 1, 2, 2], vec![1.0, -1.0, 10.0, 0.5]);
        let (out, _) = conv2d(&input, &kernel, Conv2dGeometry::default());
        assert_eq!(out.data, vec![32.0, -0.5]);
    }
}
