//! Serialisable layer configuration.
//!
//! A [`LayerConfig`] is the persisted form of a quantized layer. It holds everything
//! needed to rebuild an equivalent, unbuilt layer: the base computation's own fields
//! (flattened into the same object), the shared bias and activation settings, and the
//! scale settings under the keys `H`, `kernel_lr_multiplier` and `bias_lr_multiplier`.
//!
//! Once a layer is built its config reports the resolved numbers rather than `"auto"`,
//! so a round trip reproduces the same scale regardless of how it was first specified.

use crate::backprop;
use crate::ops::FnTen32To;
use crate::ops::cpu::{nchw_to_nhwc, nhwc_to_nchw};
use crate::quant::ScaleSpec;
use crate::tensors::Ten32;
use briny::prelude::*;
use serde::{Deserialize, Serialize};

pub use crate::ops::cpu::Padding;

/// Activation applied after the bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    /// Applies the activation, returning the output and its backward function.
    pub fn apply(self, input: &Ten32) -> (Ten32, Box<FnTen32To>) {
        match self {
            Self::Linear => (input.clone(), Box::new(|grad: &Ten32| grad.clone())),
            Self::Relu => backprop::relu(input),
            Self::Tanh => backprop::tanh(input),
            Self::Sigmoid => backprop::sigmoid(input),
        }
    }
}

/// Memory layout of rank-4 convolution inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// `[batch, height, width, channels]`
    #[default]
    ChannelsLast,
    /// `[batch, channels, height, width]`
    ChannelsFirst,
}

impl DataFormat {
    #[must_use]
    pub const fn channel_axis(self) -> usize {
        match self {
            Self::ChannelsLast => 3,
            Self::ChannelsFirst => 1,
        }
    }

    /// `(height, width)` axes.
    #[must_use]
    pub const fn spatial_axes(self) -> (usize, usize) {
        match self {
            Self::ChannelsLast => (1, 2),
            Self::ChannelsFirst => (2, 3),
        }
    }

    /// Converts a tensor in this layout to NHWC.
    #[must_use]
    pub fn to_nhwc(self, t: &Ten32) -> Ten32 {
        match self {
            Self::ChannelsLast => t.clone(),
            Self::ChannelsFirst => nchw_to_nhwc(t),
        }
    }

    /// Converts an NHWC tensor back into this layout.
    #[must_use]
    pub fn from_nhwc(self, t: Ten32) -> Ten32 {
        match self {
            Self::ChannelsLast => t,
            Self::ChannelsFirst => nhwc_to_nchw(&t),
        }
    }
}

pub(crate) const fn default_true() -> bool {
    true
}

const fn default_kernel_lr() -> ScaleSpec {
    ScaleSpec::Auto
}

/// Persisted configuration of a quantized layer with base computation `C`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig<C> {
    pub name: String,
    #[serde(flatten)]
    pub op: C,
    #[serde(default = "default_true")]
    pub use_bias: bool,
    #[serde(default)]
    pub activation: Activation,
    #[serde(rename = "H", default)]
    pub h: ScaleSpec,
    #[serde(default = "default_kernel_lr")]
    pub kernel_lr_multiplier: ScaleSpec,
    #[serde(default)]
    pub bias_lr_multiplier: Option<ScaleSpec>,
}

fn finite_positive(spec: ScaleSpec) -> bool {
    match spec {
        ScaleSpec::Literal(v) => v.is_finite() && v > 0.0,
        ScaleSpec::Auto => true,
    }
}

fn finite(spec: ScaleSpec) -> bool {
    match spec {
        ScaleSpec::Literal(v) => v.is_finite(),
        ScaleSpec::Auto => true,
    }
}

impl<C> Validate for LayerConfig<C> {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError);
        }
        if !finite_positive(self.h) || !finite(self.kernel_lr_multiplier) {
            return Err(ValidationError);
        }
        if self.bias_lr_multiplier.is_some_and(|spec| !finite(spec)) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Units {
        units: usize,
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config: LayerConfig<Units> = serde_json::from_value(json!({"name": "d", "units": 4})).unwrap();
        assert_eq!(config.op, Units { units: 4 });
        assert!(config.use_bias);
        assert_eq!(config.activation, Activation::Linear);
        assert_eq!(config.h, ScaleSpec::Literal(1.0));
        assert_eq!(config.kernel_lr_multiplier, ScaleSpec::Auto);
        assert_eq!(config.bias_lr_multiplier, None);
    }

    #[test]
    fn fields_are_flat() {
        let config = LayerConfig {
            name: "d".to_owned(),
            op: Units { units: 2 },
            use_bias: false,
            activation: Activation::Relu,
            h: ScaleSpec::Auto,
            kernel_lr_multiplier: ScaleSpec::Literal(2.0),
            bias_lr_multiplier: Some(ScaleSpec::Auto),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "d",
                "units": 2,
                "use_bias": false,
                "activation": "relu",
                "H": "auto",
                "kernel_lr_multiplier": 2.0,
                "bias_lr_multiplier": "auto",
            })
        );
        let back: LayerConfig<Units> = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn validation_rejects_bad_scale() {
        let mut config: LayerConfig<Units> = serde_json::from_value(json!({"name": "d", "units": 1})).unwrap();
        assert!(config.validate().is_ok());
        config.h = ScaleSpec::Literal(-1.0);
        assert!(config.validate().is_err());
        config.h = ScaleSpec::Auto;
        config.bias_lr_multiplier = Some(ScaleSpec::Literal(f32::INFINITY));
        assert!(config.validate().is_err());
    }

    #[test]
    fn layouts() {
        assert_eq!(DataFormat::ChannelsFirst.channel_axis(), 1);
        assert_eq!(serde_json::to_string(&DataFormat::ChannelsLast).unwrap(), "\"channels_last\"");
        let t = Ten32::new(vec![1, 2, 1, 3], (0..6).map(|v| v as f32).collect());
        let nhwc = DataFormat::ChannelsFirst.to_nhwc(&t);
        assert_eq!(nhwc.shape, vec![1, 1, 3, 2]);
        assert_eq!(DataFormat::ChannelsFirst.from_nhwc(nhwc), t);
    }
}
