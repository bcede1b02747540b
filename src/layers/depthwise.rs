//! Depthwise-separable convolution with binarized weights.
//!
//! Two latent kernels are trained: a depthwise kernel `(kh, kw, C, depth_multiplier)`
//! convolving each input channel on its own, and a pointwise kernel
//! `(1, 1, C * depth_multiplier, filters)` mixing the result. Both share one `H`,
//! resolved from the fan of the equivalent full convolution, and each has its own
//! [`Clip`](crate::quant::Clip). Strides, padding and dilation apply to the depthwise
//! stage only.

use super::conv::{ConvBase, ConvOptions};
use super::quantized::{BaseComputation, ComputeBackFn, QuantizedWeightLayer};
use super::source::WeightSlot;
use crate::backprop;
use crate::error::{BnnError, Result};
use crate::ops::cpu::Conv2dGeometry;
use crate::quant::Fan;
use crate::tensors::Ten32;
use serde::{Deserialize, Serialize};

const fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparableConv2dOp {
    #[serde(flatten)]
    pub options: ConvOptions,
    #[serde(default = "one")]
    pub depth_multiplier: usize,
}

impl ConvBase for SeparableConv2dOp {
    fn options(&self) -> &ConvOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut ConvOptions {
        &mut self.options
    }
}

/// Depthwise-separable convolution layer with both kernels binarized to `±H`.
pub type DepthwiseBinaryConv2D = QuantizedWeightLayer<SeparableConv2dOp>;

impl QuantizedWeightLayer<SeparableConv2dOp> {
    pub fn new(filters: usize, kernel_size: (usize, usize)) -> Self {
        Self::with_op(SeparableConv2dOp {
            options: ConvOptions::new(filters, kernel_size),
            depth_multiplier: 1,
        })
    }

    #[must_use]
    pub fn with_depth_multiplier(mut self, depth_multiplier: usize) -> Self {
        self.op_mut().depth_multiplier = depth_multiplier;
        self
    }
}

impl BaseComputation for SeparableConv2dOp {
    const KIND: &'static str = "depthwise_binary_conv2d";

    fn input_dim(&self, input_shape: &[Option<usize>]) -> Result<usize> {
        self.options.input_channels(input_shape)
    }

    fn kernel_shapes(&self, input_dim: usize) -> Vec<(WeightSlot, Vec<usize>)> {
        let (kh, kw) = self.options.kernel_size;
        let m = self.depth_multiplier;
        vec![
            (WeightSlot::DepthwiseKernel, vec![kh, kw, input_dim, m]),
            (WeightSlot::PointwiseKernel, vec![1, 1, input_dim * m, self.options.filters]),
        ]
    }

    fn fan(&self, input_dim: usize) -> Fan {
        Fan::conv(input_dim, self.options.filters, self.options.kernel_size)
    }

    fn bias_len(&self) -> usize {
        self.options.filters
    }

    fn bias_axis(&self, _output_rank: usize) -> usize {
        self.options.data_format.channel_axis()
    }

    fn validate(&self) -> Result<()> {
        if self.depth_multiplier == 0 {
            return Err(BnnError::InvalidConfig("depth_multiplier must be positive".to_owned()));
        }
        self.options.validate()
    }

    fn compute(&self, input: &Ten32, kernels: &[Ten32]) -> Result<(Ten32, Box<ComputeBackFn>)> {
        let [depthwise, pointwise] = kernels else {
            return Err(BnnError::InvalidConfig(format!(
                "separable conv2d expects 2 kernels, got {}",
                kernels.len()
            )));
        };
        let nhwc = self.options.prepare(input)?;
        let (mid, depthwise_back) = backprop::depthwise_conv2d(&nhwc, depthwise, self.options.geometry());
        let (out, pointwise_back) = backprop::conv2d(&mid, pointwise, Conv2dGeometry::default());
        let format = self.options.data_format;

        let back = move |grad: &Ten32| {
            let (grad_mid, grad_pointwise) = pointwise_back(&format.to_nhwc(grad));
            let (grad_input, grad_depthwise) = depthwise_back(&grad_mid);
            (format.from_nhwc(grad_input), vec![grad_depthwise, grad_pointwise])
        };

        Ok((format.from_nhwc(out), Box::new(back)))
    }
}
