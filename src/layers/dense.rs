//! Fully-connected layer with binarized weights.

use super::quantized::{BaseComputation, ComputeBackFn, QuantizedWeightLayer};
use super::source::WeightSlot;
use crate::backprop;
use crate::error::{BnnError, Result};
use crate::quant::Fan;
use crate::tensors::{Ten32, Tensor};
use serde::{Deserialize, Serialize};

/// `input · kernel` over the last axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseOp {
    pub units: usize,
}

/// Dense layer whose `(input_dim, units)` kernel is binarized to `±H`.
pub type BinaryDense = QuantizedWeightLayer<DenseOp>;

impl QuantizedWeightLayer<DenseOp> {
    pub fn new(units: usize) -> Self {
        Self::with_op(DenseOp { units })
    }
}

impl BaseComputation for DenseOp {
    const KIND: &'static str = "binary_dense";

    fn input_dim(&self, input_shape: &[Option<usize>]) -> Result<usize> {
        if input_shape.len() < 2 {
            return Err(BnnError::InvalidRank {
                expected: 2,
                actual: input_shape.len(),
            });
        }
        let axis = input_shape.len() - 1;
        input_shape[axis].ok_or(BnnError::UndefinedDimension { axis })
    }

    fn kernel_shapes(&self, input_dim: usize) -> Vec<(WeightSlot, Vec<usize>)> {
        vec![(WeightSlot::Kernel, vec![input_dim, self.units])]
    }

    fn fan(&self, input_dim: usize) -> Fan {
        Fan::dense(input_dim, self.units)
    }

    fn bias_len(&self) -> usize {
        self.units
    }

    fn bias_axis(&self, output_rank: usize) -> usize {
        output_rank - 1
    }

    fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(BnnError::InvalidConfig("units must be positive".to_owned()));
        }
        Ok(())
    }

    fn compute(&self, input: &Ten32, kernels: &[Ten32]) -> Result<(Ten32, Box<ComputeBackFn>)> {
        let [kernel] = kernels else {
            return Err(BnnError::InvalidConfig(format!("dense expects 1 kernel, got {}", kernels.len())));
        };
        let input_dim = kernel.shape[0];
        let units = self.units;
        let (leading, _) = input.shape.split_at(input.rank() - 1);
        let rows = leading.iter().product::<usize>();

        // rank > 2 inputs are flattened to a matrix and restored afterwards
        let flat = Tensor::new(vec![rows, input_dim], input.data.clone());
        let (out, matmul_back) = backprop::matmul(&flat, kernel);
        let mut out_shape = leading.to_vec();
        out_shape.push(units);
        let out = out.reshape(out_shape);

        let input_shape = input.shape.clone();
        let back = move |grad: &Ten32| {
            let grad = Tensor::new(vec![rows, units], grad.data.clone());
            let (grad_input, grad_kernel) = matmul_back(&grad);
            (grad_input.reshape(input_shape.clone()), vec![grad_kernel])
        };

        Ok((out, Box::new(back)))
    }
}
