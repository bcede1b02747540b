use super::conv2d::{Conv2dGeometry, source_index};
use crate::ops::FnToDoubleTen32;
use crate::tensors::{Ten32, Tensor};
use rayon::prelude::*;

/// Performs a depthwise 2D convolution: every input channel is convolved with its own
/// `depth_multiplier` filters, without mixing channels.
///
/// # Shapes
/// - `input`: `[n, h, w, c]`
/// - `kernel`: `[kh, kw, c, m]`
/// - output: `[n, oh, ow, c * m]`, output channel `ci * m + mi`
///
/// # Returns
/// - Output tensor
/// - Backward function mapping `dL/d(out)` to `(dL/d(input), dL/d(kernel))`
///
/// # Panics
/// - If ranks or channel counts mismatch, a stride or dilation is zero, or the output
///   would be empty.
pub fn depthwise_conv2d(
    input: &Ten32,
    kernel: &Ten32,
    geometry: Conv2dGeometry,
) -> (Ten32, Box<FnToDoubleTen32>) {
    assert_eq!(input.rank(), 4, "depthwise input must be NHWC, got {:?}", input.shape);
    assert_eq!(kernel.rank(), 4, "depthwise kernel must be [kh, kw, c, m], got {:?}", kernel.shape);
    let (n, h, w, c) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
    let (kh, kw, kc, m) = (kernel.shape[0], kernel.shape[1], kernel.shape[2], kernel.shape[3]);
    assert_eq!(c, kc, "depthwise channel mismatch");
    let (sh, sw) = geometry.strides;
    let (dh, dw) = geometry.dilation;
    assert!(sh > 0 && sw > 0 && dh > 0 && dw > 0, "depthwise strides and dilation must be positive");

    let (wy, wx) = geometry.windows(h, w, kh, kw);
    let (oh, ow) = (wy.out, wx.out);
    let cm = c * m;
    assert!(n * oh * ow * cm > 0, "depthwise output is empty");

    let mut out = vec![0.0; n * oh * ow * cm];
    out.par_chunks_mut(ow * cm).enumerate().for_each(|(row, out_row)| {
        let b = row / oh;
        let y = row % oh;
        for x in 0..ow {
            let acc = &mut out_row[x * cm..(x + 1) * cm];
            for ky in 0..kh {
                let Some(iy) = source_index(y, ky, sh, dh, wy.pad_before, h) else {
                    continue;
                };
                for kx in 0..kw {
                    let Some(ix) = source_index(x, kx, sw, dw, wx.pad_before, w) else {
                        continue;
                    };
                    let in_base = ((b * h + iy) * w + ix) * c;
                    let k_base = (ky * kw + kx) * cm;
                    let taps = &kernel.data[k_base..k_base + cm];
                    for (j, (a, k)) in acc.iter_mut().zip(taps).enumerate() {
                        *a += input.data[in_base + j / m] * k;
                    }
                }
            }
        }
    });
    let out = Tensor::new(vec![n, oh, ow, cm], out);

    let in_val = input.data.clone();
    let k_val = kernel.data.clone();

    let back = move |grad: &Ten32| {
        assert_eq!(grad.shape, [n, oh, ow, cm], "depthwise gradient shape mismatch");

        let mut grad_in = vec![0.0; n * h * w * c];
        if h * w * c > 0 {
            grad_in.par_chunks_mut(h * w * c).enumerate().for_each(|(b, img)| {
                for y in 0..oh {
                    for x in 0..ow {
                        let g = &grad.data[((b * oh + y) * ow + x) * cm..][..cm];
                        for ky in 0..kh {
                            let Some(iy) = source_index(y, ky, sh, dh, wy.pad_before, h) else {
                                continue;
                            };
                            for kx in 0..kw {
                                let Some(ix) = source_index(x, kx, sw, dw, wx.pad_before, w) else {
                                    continue;
                                };
                                let k_base = (ky * kw + kx) * cm;
                                for ci in 0..c {
                                    let taps = &k_val[k_base + ci * m..k_base + (ci + 1) * m];
                                    let gs = &g[ci * m..(ci + 1) * m];
                                    img[(iy * w + ix) * c + ci] +=
                                        gs.iter().zip(taps).map(|(g, k)| g * k).sum::<f32>();
                                }
                            }
                        }
                    }
                }
            });
        }

        // one chunk per (ky, kx, ci)
        let mut grad_k = vec![0.0; kh * kw * cm];
        grad_k.par_chunks_mut(m).enumerate().for_each(|(r, taps)| {
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
                        let g = &grad.data[((b * oh + y) * ow + x) * cm + ci * m..][..m];
                        for (k, g) in taps.iter_mut().zip(g) {
                            *k += v * g;
                        }
                    }
                }
            }
        });

        (
            Tensor::new(vec![n, h, w, c], grad_in),
            Tensor::new(vec![kh, kw, c, m], grad_k),
        )
    };

    (out, Box::new(back))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_stay_separate() {
        // 2x2 image, two channels; 2x2 kernel, multiplier 1
        let input = Tensor::new(vec![1, 2, 2, 2], vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        let kernel = Tensor::new(vec![2, 2, 2, 1], vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
        let (out, back) = depthwise_conv2d(&input, &kernel, Conv2dGeometry::default());
        assert_eq!(out.shape, vec![1, 1, 1, 2]);
        // channel 0 sums all taps, channel 1 only sees the last tap
        assert_eq!(out.data, vec![10.0, 40.0]);

        let (grad_in, grad_k) = back(&Tensor::new(vec![1, 1, 1, 2], vec![1.0, 2.0]));
        assert_eq!(grad_in.data, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 2.0]);
        assert_eq!(grad_k.data, vec![1.0, 20.0, 2.0, 40.0, 3.0, 60.0, 4.0, 80.0]);
    }

    #[test]
    fn depth_multiplier_expands_channels() {
        let input = Tensor::new(vec![1, 1, 1, 2], vec![2.0, 3.0]);
        let kernel = Tensor::new(vec![1, 1, 2, 2], vec![1.0, -1.0, 0.5, 2.0]);
        let (out, _) = depthwise_conv2d(&input, &kernel, Conv2dGeometry::default());
        assert_eq!(out.shape, vec![1, 1, 1, 4]);
        assert_eq!(out.data, vec![2.0, -2.0, 1.5, 6.0]);
    }
}
