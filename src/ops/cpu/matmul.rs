use crate::ops::FnToDoubleTen32;
use crate::tensors::{Ten32, Tensor, TensorFloat};
use rayon::prelude::*;

/// Performs a matrix multiplication `C = A × B` on two 2D tensors (`A: m×k`, `B: k×n`),
/// returning the result tensor and a closure for backpropagation.
///
/// # Requirements
/// - Shapes must be compatible: `A.shape = [m, k]` and `B.shape = [k, n]`.
///
/// # Optimizations
/// - Uses `rayon` for parallel row computation in both passes
///
/// # Returns
/// - Output tensor of shape `[m, n]`
/// - Backward function computing gradients w.r.t. `A` and `B`
///
/// # Panics
/// - If either operand is not rank 2 or the inner dimensions do not match.
pub fn matmul(a: &Ten32, b: &Ten32) -> (Ten32, Box<FnToDoubleTen32>) {
    assert_eq!(a.rank(), 2, "matmul lhs must be rank 2, got {:?}", a.shape);
    assert_eq!(b.rank(), 2, "matmul rhs must be rank 2, got {:?}", b.shape);
    let m = a.shape[0];
    let k = a.shape[1];
    let n = b.shape[1];
    assert_eq!(k, b.shape[0], "matmul shape mismatch");

    let out = Tensor::new(vec![m, n], product(&a.data, &b.data, m, k, n));

    let a_val = a.data.clone();
    let b_val = b.data.clone();

    let back = move |grad: &Ten32| {
        assert_eq!(grad.shape, [m, n], "matmul gradient shape mismatch");

        // dA = G · Bᵀ
        let mut grad_a = vec![0.0; m * k];
        if k > 0 {
            grad_a
                .par_chunks_mut(k)
                .enumerate()
                .for_each(|(i, row)| {
                    let g_row = &grad.data[i * n..(i + 1) * n];
                    for (l, out) in row.iter_mut().enumerate() {
                        let b_row = &b_val[l * n..(l + 1) * n];
                        *out = g_row.iter().zip(b_row).map(|(g, b)| g * b).sum();
                    }
                });
        }

        // dB = Aᵀ · G
        let mut grad_b = vec![0.0; k * n];
        if n > 0 {
            grad_b
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(l, row)| {
                    for i in 0..m {
                        let a_il = a_val[i * k + l];
                        let g_row = &grad.data[i * n..(i + 1) * n];
                        for (out, g) in row.iter_mut().zip(g_row) {
                            *out += a_il * g;
                        }
                    }
                });
        }

        (
            Tensor::new(vec![m, k], grad_a),
            Tensor::new(vec![k, n], grad_b),
        )
    };

    (out, Box::new(back))
}

fn product(a: &[TensorFloat], b: &[TensorFloat], m: usize, k: usize, n: usize) -> Vec<TensorFloat> {
    let mut out = vec![0.0; m * n];
    if n == 0 {
        return out;
    }
    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for l in 0..k {
            let a_il = a[i * k + l];
            let b_row = &b[l * n..(l + 1) * n];
            for (o, b) in row.iter_mut().zip(b_row) {
                *o += a_il * b;
            }
        }
    });
    out
}
