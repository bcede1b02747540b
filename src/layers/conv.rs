//! 2D convolution with binarized weights.

use super::config::{DataFormat, Padding, default_true};
use super::quantized::{BaseComputation, ComputeBackFn, QuantizedWeightLayer};
use super::source::WeightSlot;
use crate::backprop;
use crate::error::{BnnError, Result};
use crate::ops::cpu::Conv2dGeometry;
use crate::quant::{Fan, WeightTransform};
use crate::tensors::Ten32;
use serde::{Deserialize, Serialize};

const fn unit_pair() -> (usize, usize) {
    (1, 1)
}

/// Settings shared by the convolutional layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvOptions {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    #[serde(default = "unit_pair")]
    pub strides: (usize, usize),
    #[serde(default)]
    pub padding: Padding,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default = "unit_pair")]
    pub dilation_rate: (usize, usize),
}

impl ConvOptions {
    #[must_use]
    pub const fn new(filters: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            filters,
            kernel_size,
            strides: (1, 1),
            padding: Padding::Valid,
            data_format: DataFormat::ChannelsLast,
            dilation_rate: (1, 1),
        }
    }

    #[must_use]
    pub const fn geometry(&self) -> Conv2dGeometry {
        Conv2dGeometry {
            strides: self.strides,
            dilation: self.dilation_rate,
            padding: self.padding,
        }
    }

    /// Channel count of a rank-4 input in this layout.
    ///
    /// # Errors
    /// [`BnnError::InvalidRank`] unless rank 4, [`BnnError::UndefinedChannel`] when the
    /// channel axis is `None`.
    pub fn input_channels(&self, input_shape: &[Option<usize>]) -> Result<usize> {
        if input_shape.len() != 4 {
            return Err(BnnError::InvalidRank {
                expected: 4,
                actual: input_shape.len(),
            });
        }
        let axis = self.data_format.channel_axis();
        input_shape[axis].ok_or(BnnError::UndefinedChannel { axis })
    }

    /// # Errors
    /// [`BnnError::InvalidConfig`] when any size, stride or dilation is zero.
    pub fn validate(&self) -> Result<()> {
        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.strides;
        let (dh, dw) = self.dilation_rate;
        if self.filters == 0 {
            return Err(BnnError::InvalidConfig("filters must be positive".to_owned()));
        }
        if kh == 0 || kw == 0 {
            return Err(BnnError::InvalidConfig(format!("invalid kernel_size {:?}", self.kernel_size)));
        }
        if sh == 0 || sw == 0 || dh == 0 || dw == 0 {
            return Err(BnnError::InvalidConfig(format!(
                "strides {:?} and dilation_rate {:?} must be positive",
                self.strides, self.dilation_rate
            )));
        }
        Ok(())
    }

    /// Converts `input` to NHWC and checks the convolution leaves a non-empty output.
    ///
    /// # Errors
    /// [`BnnError::EmptyOutput`] when the batch or a spatial output axis is empty.
    pub(crate) fn prepare(&self, input: &Ten32) -> Result<Ten32> {
        let nhwc = self.data_format.to_nhwc(input);
        let (kh, kw) = self.kernel_size;
        let (wy, wx) = self.geometry().windows(nhwc.shape[1], nhwc.shape[2], kh, kw);
        if nhwc.shape[0] * wy.out * wx.out == 0 {
            return Err(BnnError::EmptyOutput {
                input: input.shape.clone(),
            });
        }
        Ok(nhwc)
    }
}

/// Exposes the [`ConvOptions`] of a convolutional base computation.
pub trait ConvBase {
    fn options(&self) -> &ConvOptions;
    fn options_mut(&mut self) -> &mut ConvOptions;
}

impl<C: BaseComputation + ConvBase> QuantizedWeightLayer<C> {
    #[must_use]
    pub fn with_strides(mut self, strides: (usize, usize)) -> Self {
        self.op_mut().options_mut().strides = strides;
        self
    }

    #[must_use]
    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.op_mut().options_mut().padding = padding;
        self
    }

    #[must_use]
    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.op_mut().options_mut().data_format = data_format;
        self
    }

    #[must_use]
    pub fn with_dilation_rate(mut self, dilation_rate: (usize, usize)) -> Self {
        self.op_mut().options_mut().dilation_rate = dilation_rate;
        self
    }
}

/// Standard convolution with an HWIO kernel `(kh, kw, input_channels, filters)`.
///
/// With `binarize = false` the latent kernel is used as-is (scale, constraint and
/// learning-rate multipliers still apply).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dOp {
    #[serde(flatten)]
    pub options: ConvOptions,
    #[serde(default = "default_true")]
    pub binarize: bool,
}

impl ConvBase for Conv2dOp {
    fn options(&self) -> &ConvOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut ConvOptions {
        &mut self.options
    }
}

/// Convolution layer whose kernel is binarized to `±H`.
pub type BinaryConv2D = QuantizedWeightLayer<Conv2dOp>;

/// Alias kept for configurations written against the longer name.
pub type BinaryConvolution2D = BinaryConv2D;

impl QuantizedWeightLayer<Conv2dOp> {
    pub fn new(filters: usize, kernel_size: (usize, usize)) -> Self {
        Self::with_op(Conv2dOp {
            options: ConvOptions::new(filters, kernel_size),
            binarize: true,
        })
    }

    #[must_use]
    pub fn with_binarize(mut self, binarize: bool) -> Self {
        self.op_mut().binarize = binarize;
        self
    }
}

impl BaseComputation for Conv2dOp {
    const KIND: &'static str = "binary_conv2d";

    fn input_dim(&self, input_shape: &[Option<usize>]) -> Result<usize> {
        self.options.input_channels(input_shape)
    }

    fn kernel_shapes(&self, input_dim: usize) -> Vec<(WeightSlot, Vec<usize>)> {
        let (kh, kw) = self.options.kernel_size;
        vec![(WeightSlot::Kernel, vec![kh, kw, input_dim, self.options.filters])]
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

    fn transform(&self) -> WeightTransform {
        WeightTransform::from_flag(self.binarize)
    }

    fn validate(&self) -> Result<()> {
        self.options.validate()
    }

    fn compute(&self, input: &Ten32, kernels: &[Ten32]) -> Result<(Ten32, Box<ComputeBackFn>)> {
        let [kernel] = kernels else {
            return Err(BnnError::InvalidConfig(format!("conv2d expects 1 kernel, got {}", kernels.len())));
        };
        let nhwc = self.options.prepare(input)?;
        let (out, conv_back) = backprop::conv2d(&nhwc, kernel, self.options.geometry());
        let format = self.options.data_format;

        let back = move |grad: &Ten32| {
            let (grad_input, grad_kernel) = conv_back(&format.to_nhwc(grad));
            (format.from_nhwc(grad_input), vec![grad_kernel])
        };

        Ok((format.from_nhwc(out), Box::new(back)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Layer;
    use crate::quant::ScaleSpec;
    use crate::tensors::Tensor;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn undefined_channel_is_an_error() {
        let mut layer = BinaryConv2D::new(4, (3, 3));
        assert!(matches!(
            layer.build(&[None, Some(8), Some(8), None]),
            Err(BnnError::UndefinedChannel { axis: 3 })
        ));
        let mut layer = BinaryConv2D::new(4, (3, 3)).with_data_format(DataFormat::ChannelsFirst);
        assert!(matches!(
            layer.build(&[None, None, Some(8), Some(8)]),
            Err(BnnError::UndefinedChannel { axis: 1 })
        ));
        assert!(!layer.is_built());
    }

    #[test]
    fn conv_scale_uses_kernel_area() {
        let mut layer = BinaryConv2D::new(32, (3, 3)).with_h(ScaleSpec::Auto);
        layer.build(&[None, Some(28), Some(28), Some(16)]).unwrap();
        let expected = (1.5f64 / (16.0 * 9.0 + 32.0 * 9.0)).sqrt();
        assert!((f64::from(layer.h().unwrap()) - expected).abs() < 1e-7);
        assert_eq!(layer.kernel(WeightSlot::Kernel).unwrap().shape, vec![3, 3, 16, 32]);
    }

    #[test]
    fn binarize_flag_selects_latent_kernel() {
        let latent = Tensor::new(vec![1, 1, 1, 1], vec![0.25]);
        let source = Arc::new(crate::layers::SharedWeights::new().with(WeightSlot::Kernel, latent));
        let input = Tensor::new(vec![1, 1, 1, 1], vec![2.0]);

        let mut binary = BinaryConv2D::new(1, (1, 1))
            .with_bias(false)
            .with_weight_source(source.clone());
        assert_eq!(binary.forward(&input, false).unwrap().output.data, vec![2.0]);

        let mut plain = BinaryConv2D::new(1, (1, 1))
            .with_bias(false)
            .with_binarize(false)
            .with_weight_source(source);
        assert_eq!(plain.forward(&input, false).unwrap().output.data, vec![0.5]);
    }

    #[test]
    fn channels_first_bias_and_shape() {
        let mut layer = BinaryConv2D::new(2, (1, 1))
            .with_data_format(DataFormat::ChannelsFirst)
            .with_seed(5);
        let input = Tensor::new(vec![1, 3, 2, 2], vec![0.0; 12]);
        let fwd = layer.forward(&input, false).unwrap();
        assert_eq!(fwd.output.shape, vec![1, 2, 2, 2]);
        let grads = (fwd.back)(&Tensor::new(vec![1, 2, 2, 2], vec![1.0; 8]));
        assert_eq!(grads.input.shape, vec![1, 3, 2, 2]);
        // bias gradient sums the four pixels of each filter plane
        assert_eq!(grads.params[1].data, vec![4.0, 4.0]);
    }

    #[test]
    fn empty_output_is_an_error() {
        let mut layer = BinaryConv2D::new(1, (3, 3));
        let input = Tensor::new(vec![1, 2, 2, 1], vec![0.0; 4]);
        assert!(matches!(layer.forward(&input, false), Err(BnnError::EmptyOutput { .. })));
    }

    #[test]
    fn config_is_flat_and_defaults_fill_in() {
        let layer = BinaryConv2D::new(8, (3, 3)).with_name("c").with_padding(Padding::Same);
        let config = layer.get_config().unwrap();
        assert_eq!(config["filters"], json!(8));
        assert_eq!(config["kernel_size"], json!([3, 3]));
        assert_eq!(config["padding"], json!("same"));
        assert_eq!(config["binarize"], json!(true));

        let minimal = json!({"name": "c2", "filters": 2, "kernel_size": [1, 1]});
        let restored = BinaryConv2D::from_json(minimal).unwrap();
        assert_eq!(restored.op().options.strides, (1, 1));
        assert!(restored.op().binarize);
        assert!(BinaryConv2D::from_json(json!({"name": "c3", "filters": 0, "kernel_size": [1, 1]})).is_err());
    }
}
