//! Weight quantization primitives.
//!
//! - [`binarize`]: the `±H` step operator and its clipped straight-through gradient
//! - [`scale`]: resolution of `H` and learning-rate multipliers from a layer's fan
//! - [`clip`]: the range constraint keeping latent weights inside `[-H, H]`

pub mod binarize;
pub mod clip;
pub mod scale;

pub use self::binarize::{WeightTransform, binarize};
pub use self::clip::{Clip, Constraint};
pub use self::scale::{Fan, ResolvedScale, ScaleSpec, resolve};
