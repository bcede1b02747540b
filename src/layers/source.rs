//! Injection of externally supplied latent weights.

use crate::tensors::Ten32;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Names a latent kernel slot of a quantized layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSlot {
    /// The single kernel of dense and conv layers.
    Kernel,
    /// First stage of a depthwise-separable convolution.
    DepthwiseKernel,
    /// Second (1x1) stage of a depthwise-separable convolution.
    PointwiseKernel,
}

impl WeightSlot {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::DepthwiseKernel => "depthwise_kernel",
            Self::PointwiseKernel => "pointwise_kernel",
        }
    }
}

impl fmt::Display for WeightSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supplies initial latent weights at build time.
///
/// Returning `None` falls back to random initialisation for that slot. A returned
/// tensor is copied into the layer, so the source never aliases layer state. Its shape
/// must equal `shape` or the build fails.
pub trait WeightSource: Send + Sync {
    fn fetch(&self, slot: WeightSlot, shape: &[usize]) -> Option<Ten32>;
}

impl<F> WeightSource for F
where
    F: Fn(WeightSlot, &[usize]) -> Option<Ten32> + Send + Sync,
{
    fn fetch(&self, slot: WeightSlot, shape: &[usize]) -> Option<Ten32> {
        self(slot, shape)
    }
}

/// A fixed set of weights keyed by slot, e.g. exported from another layer.
#[derive(Debug, Clone, Default)]
pub struct SharedWeights {
    weights: HashMap<WeightSlot, Ten32>,
}

impl SharedWeights {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the weight of `slot`.
    #[must_use]
    pub fn with(mut self, slot: WeightSlot, weight: Ten32) -> Self {
        self.insert(slot, weight);
        self
    }

    pub fn insert(&mut self, slot: WeightSlot, weight: Ten32) -> Option<Ten32> {
        self.weights.insert(slot, weight)
    }

    #[must_use]
    pub fn get(&self, slot: WeightSlot) -> Option<&Ten32> {
        self.weights.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl WeightSource for SharedWeights {
    fn fetch(&self, slot: WeightSlot, _shape: &[usize]) -> Option<Ten32> {
        self.weights.get(&slot).cloned()
    }
}
