//! Per-forward observation of latent and binarized kernels.

use super::source::WeightSlot;
use crate::tensors::Ten32;
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Receives every kernel a quantized layer binarizes, once per slot per forward pass.
///
/// Observers only read; the tensors they see are the ones the forward pass uses.
pub trait WeightObserver: Send + Sync {
    fn observe(&self, layer: &str, slot: WeightSlot, latent: &Ten32, binarized: &Ten32);
}

/// Logs the leading elements of observed kernels through `log::debug!`.
///
/// Only the first `first_n` observations are logged; each tensor is truncated to
/// `summarize` elements.
#[derive(Debug)]
pub struct LogObserver {
    first_n: usize,
    summarize: usize,
    seen: AtomicUsize,
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new(3, 20)
    }
}

impl LogObserver {
    #[must_use]
    pub const fn new(first_n: usize, summarize: usize) -> Self {
        Self {
            first_n,
            summarize,
            seen: AtomicUsize::new(0),
        }
    }

    /// Number of observations received so far, logged or not.
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::Relaxed)
    }

    fn head<'a>(&self, t: &'a Ten32) -> &'a [f32] {
        &t.data[..t.len().min(self.summarize)]
    }
}

impl WeightObserver for LogObserver {
    fn observe(&self, layer: &str, slot: WeightSlot, latent: &Ten32, binarized: &Ten32) {
        let n = self.seen.fetch_add(1, Ordering::Relaxed);
        if n >= self.first_n {
            return;
        }
        debug!("{layer}/{slot} latent {:?}: {:?}", latent.shape, self.head(latent));
        debug!("{layer}/{slot} binarized: {:?}", self.head(binarized));
    }
}
