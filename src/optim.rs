//! Optimizers for latent weights.

use crate::backprop;
use crate::layers::Layer;
use crate::quant::Constraint;
use crate::tensors::TensorFloat;
use log::trace;

/// Plain stochastic gradient descent with per-parameter learning-rate multipliers.
///
/// Each step updates `w -= lr * multiplier * grad`, resets the gradient and then runs
/// the parameter's constraint, so latent weights are back in `[-H, H]` before the
/// next forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    lr: TensorFloat,
}

impl Sgd {
    #[must_use]
    pub const fn new(lr: TensorFloat) -> Self {
        Self { lr }
    }

    #[must_use]
    pub const fn lr(&self) -> TensorFloat {
        self.lr
    }

    /// Applies one update to every parameter of `layer`.
    pub fn step<L: Layer + ?Sized>(&self, layer: &mut L) {
        for param in layer.params_mut() {
            let lr = self.lr * param.lr_multiplier.unwrap_or(1.0);
            trace!("sgd {} with lr {lr}", param.name);
            backprop::sgd(&mut param.weight, lr);
            if let Some(clip) = &param.constraint {
                clip.project(&mut param.weight.value);
            }
        }
    }
}
