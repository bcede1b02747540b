//! Trainable layers with binarized weights.
//!
//! # Lifecycle
//!
//! Every layer goes through the same three steps:
//!
//! 1. **build**: from an input shape (batch axis may be `None`) the layer resolves its
//!    scale `H`, allocates latent weights uniformly in `[-H, H]` (or copies them from a
//!    [`WeightSource`]) and registers a [`Clip`] constraint on each kernel.
//! 2. **forward**: each kernel is binarized to `±H`, the base computation runs on the
//!    binarized view, then bias and activation are applied. The returned backward
//!    function routes gradients to the latent weights through the straight-through rule.
//! 3. **update**: an optimizer such as [`crate::optim::Sgd`] steps the latent weights and
//!    projects them back into range.
//!
//! Layers build lazily on their first forward call if [`Layer::build`] was never called.
//!
//! # Example
//!
//! ```rust
//! use briny_bnn::layers::{BinaryDense, Layer};
//! use briny_bnn::quant::ScaleSpec;
//! use briny_bnn::tensor;
//!
//! let mut layer = BinaryDense::new(3).with_h(ScaleSpec::Auto).with_seed(0);
//! let fwd = layer.forward(&tensor!([[1.0, 0.5]]), true).unwrap();
//! assert_eq!(fwd.output.shape, vec![1, 3]);
//!
//! let grads = (fwd.back)(&tensor!([[1.0, 1.0, 1.0]]));
//! assert_eq!(grads.params.len(), 2); // kernel and bias
//! ```

pub mod config;
pub mod conv;
pub mod dense;
pub mod depthwise;
pub mod dropout;
pub mod observe;
pub mod quantized;
pub mod source;

pub use self::config::{Activation, DataFormat, LayerConfig, Padding};
pub use self::conv::{BinaryConv2D, BinaryConvolution2D, Conv2dOp, ConvOptions};
pub use self::dense::{BinaryDense, DenseOp};
pub use self::depthwise::{DepthwiseBinaryConv2D, SeparableConv2dOp};
pub use self::dropout::DropoutNoScale;
pub use self::observe::{LogObserver, WeightObserver};
pub use self::quantized::{BaseComputation, QuantizedWeightLayer};
pub use self::source::{SharedWeights, WeightSlot, WeightSource};

use crate::error::{BnnError, Result};
use crate::quant::{Clip, Constraint};
use crate::tensors::{Ten32, TensorFloat, WithGrad};

/// Backward function of a whole layer.
pub type LayerBackFn = dyn Fn(&Ten32) -> LayerGrads + Send + Sync;

/// A trainable tensor owned by a layer.
#[derive(Debug, Clone)]
pub struct Param {
    /// `<layer>/<slot>`, e.g. `binary_dense_3/kernel`.
    pub name: String,
    pub weight: WithGrad<Ten32>,
    /// Projection run after every optimizer update.
    pub constraint: Option<Clip>,
    /// Per-parameter learning-rate scale; `None` means 1.
    pub lr_multiplier: Option<TensorFloat>,
}

/// Result of a forward pass.
pub struct Forward {
    pub output: Ten32,
    pub back: Box<LayerBackFn>,
}

/// Gradients produced by a layer's backward function.
#[derive(Debug, Clone)]
pub struct LayerGrads {
    /// `dL/d(input)`.
    pub input: Ten32,
    /// `dL/d(param)` for each parameter, in [`Layer::params`] order.
    pub params: Vec<Ten32>,
}

/// Lifecycle shared by every layer in this crate.
pub trait Layer: Send {
    fn name(&self) -> &str;

    /// Allocates parameters for `input_shape`. Calling it again once built does nothing.
    ///
    /// # Errors
    /// Fails when the shape is unusable for the layer or scale resolution fails.
    fn build(&mut self, input_shape: &[Option<usize>]) -> Result<()>;

    fn is_built(&self) -> bool;

    /// Runs the layer, building it from `input.shape` first if needed.
    ///
    /// # Errors
    /// Fails when the input does not match the built shape.
    fn forward(&mut self, input: &Ten32, training: bool) -> Result<Forward>;

    fn params(&self) -> Vec<&Param>;

    fn params_mut(&mut self) -> Vec<&mut Param>;

    /// Serialises the layer's configuration.
    ///
    /// # Errors
    /// Fails only if serialisation itself fails.
    fn get_config(&self) -> Result<serde_json::Value>;

    /// Adds `grads.params` to the stored parameter gradients.
    ///
    /// # Errors
    /// Fails when the number or shapes of the gradients do not match the parameters.
    fn accumulate_grads(&mut self, grads: &LayerGrads) -> Result<()> {
        let mut params = self.params_mut();
        if params.len() != grads.params.len() {
            return Err(BnnError::InvalidConfig(format!(
                "expected {} parameter gradients, got {}",
                params.len(),
                grads.params.len()
            )));
        }
        for (param, grad) in params.iter_mut().zip(&grads.params) {
            let acc = &mut param.weight.grad;
            if acc.shape != grad.shape {
                return Err(BnnError::ShapeMismatch {
                    expected: acc.shape.clone(),
                    actual: grad.shape.clone(),
                });
            }
            for (a, g) in acc.data.iter_mut().zip(&grad.data) {
                *a += g;
            }
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for param in self.params_mut() {
            param.weight.zero_grad();
        }
    }

    /// Projects every constrained parameter back into range.
    fn apply_constraints(&mut self) {
        for param in self.params_mut() {
            if let Some(clip) = &param.constraint {
                clip.project(&mut param.weight.value);
            }
        }
    }
}

/// Marks every axis of a concrete shape as defined.
pub(crate) fn defined(shape: &[usize]) -> Vec<Option<usize>> {
    shape.iter().copied().map(Some).collect()
}
