//! Scale factor resolution.
//!
//! A layer's scale `H` and learning-rate multipliers are configured as [`ScaleSpec`]s,
//! either a literal or [`ScaleSpec::Auto`]. Automatic values are derived from the
//! layer's fan-in and fan-out with the Glorot-style formula
//! `H = sqrt(1.5 / (fan_in + fan_out))` and resolved exactly once, when the layer is
//! built.

use crate::error::{BnnError, Result};
use crate::tensors::TensorFloat;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scale-like setting that is either fixed or computed from the layer shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleSpec {
    /// Use this value unchanged.
    Literal(TensorFloat),
    /// Compute from the layer's fan-in/fan-out at build time.
    Auto,
}

impl Default for ScaleSpec {
    fn default() -> Self {
        Self::Literal(1.0)
    }
}

impl From<TensorFloat> for ScaleSpec {
    fn from(value: TensorFloat) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Display for ScaleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

// Serialised as a bare number or the string "auto".
impl Serialize for ScaleSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Literal(v) => serializer.serialize_f32(*v),
            Self::Auto => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> Deserialize<'de> for ScaleSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(TensorFloat),
            Tag(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(Self::Literal(v)),
            Repr::Tag(tag) if tag.eq_ignore_ascii_case("auto") || tag.eq_ignore_ascii_case("glorot") => {
                Ok(Self::Auto)
            }
            Repr::Tag(tag) => Err(de::Error::custom(format!(
                "expected a number, \"auto\" or \"glorot\", got {tag:?}"
            ))),
        }
    }
}

/// Effective connection counts of a weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fan {
    pub fan_in: usize,
    pub fan_out: usize,
}

impl Fan {
    /// Fan of a dense kernel `(input_dim, units)`.
    #[must_use]
    pub const fn dense(input_dim: usize, units: usize) -> Self {
        Self {
            fan_in: input_dim,
            fan_out: units,
        }
    }

    /// Fan of a 2D convolution kernel: both sides are scaled by the kernel area.
    #[must_use]
    pub const fn conv(input_channels: usize, filters: usize, kernel_size: (usize, usize)) -> Self {
        let area = kernel_size.0 * kernel_size.1;
        Self {
            fan_in: input_channels * area,
            fan_out: filters * area,
        }
    }

    /// `sqrt(1.5 / (fan_in + fan_out))`, evaluated in `f64`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn glorot_scale(&self) -> TensorFloat {
        (1.5 / (self.fan_in + self.fan_out) as f64).sqrt() as TensorFloat
    }
}

/// Frozen result of scale resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedScale {
    pub h: TensorFloat,
    pub kernel_lr_multiplier: TensorFloat,
    pub bias_lr_multiplier: Option<TensorFloat>,
}

/// Resolves `H` and the learning-rate multipliers for a layer with the given fan.
///
/// Automatic multipliers are `1 / glorot_scale`, taken from the formula even when `H`
/// itself is a literal.
///
/// # Errors
/// Returns [`BnnError::InvalidScale`] when the resolved `H` is not finite and positive,
/// or when the init range `[-H, H]` has no finite width.
pub fn resolve(
    h: ScaleSpec,
    kernel_lr_multiplier: ScaleSpec,
    bias_lr_multiplier: Option<ScaleSpec>,
    fan: Fan,
) -> Result<ResolvedScale> {
    let glorot = fan.glorot_scale();
    let pick = |spec: ScaleSpec, auto: TensorFloat| match spec {
        ScaleSpec::Literal(v) => v,
        ScaleSpec::Auto => auto,
    };

    let h = pick(h, glorot);
    if !h.is_finite() || h <= 0.0 || !(2.0 * h).is_finite() {
        return Err(BnnError::InvalidScale(h));
    }

    Ok(ResolvedScale {
        h,
        kernel_lr_multiplier: pick(kernel_lr_multiplier, 1.0 / glorot),
        bias_lr_multiplier: bias_lr_multiplier.map(|spec| pick(spec, 1.0 / glorot)),
    })
}
