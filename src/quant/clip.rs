//! Range constraint for latent weights.

use crate::tensors::{Ten32, TensorFloat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A projection applied to a parameter after each optimizer update.
pub trait Constraint: Send + Sync {
    /// Projects `w` in place.
    fn project(&self, w: &mut Ten32);
}

/// Clamps every element into `[min_value, max_value]`.
///
/// Layers register `Clip::symmetric(h)` on each kernel so latent weights stay where the
/// straight-through gradient is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawClip")]
pub struct Clip {
    min_value: TensorFloat,
    max_value: TensorFloat,
}

#[derive(Deserialize)]
struct RawClip {
    min_value: TensorFloat,
    #[serde(default)]
    max_value: Option<TensorFloat>,
}

impl From<RawClip> for Clip {
    fn from(raw: RawClip) -> Self {
        Self::new(raw.min_value, raw.max_value)
    }
}

impl Clip {
    /// Creates a clip range. An omitted `max_value` defaults to `-min_value`; reversed
    /// bounds are swapped.
    #[must_use]
    pub fn new(min_value: TensorFloat, max_value: Option<TensorFloat>) -> Self {
        let max_value = max_value.unwrap_or(-min_value);
        if min_value > max_value {
            Self {
                min_value: max_value,
                max_value: min_value,
            }
        } else {
            Self { min_value, max_value }
        }
    }

    /// The `[-h, h]` range used for a layer with scale `h`.
    #[must_use]
    pub fn symmetric(h: TensorFloat) -> Self {
        Self::new(-h, Some(h))
    }

    #[must_use]
    pub const fn min_value(&self) -> TensorFloat {
        self.min_value
    }

    #[must_use]
    pub const fn max_value(&self) -> TensorFloat {
        self.max_value
    }

    /// Clamps one element. NaN clamps to `min_value`.
    #[inline]
    #[must_use]
    pub fn clamp(&self, x: TensorFloat) -> TensorFloat {
        if x.is_nan() || x < self.min_value {
            self.min_value
        } else if x > self.max_value {
            self.max_value
        } else {
            x
        }
    }

    /// Returns a clamped copy of `w`.
    #[must_use]
    pub fn apply(&self, w: &Ten32) -> Ten32 {
        let mut out = w.clone();
        self.project(&mut out);
        out
    }
}

impl Constraint for Clip {
    fn project(&self, w: &mut Ten32) {
        w.data.par_iter_mut().for_each(|x| *x = self.clamp(*x));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::Tensor;
    use proptest::prelude::*;

    #[test]
    fn max_defaults_to_negated_min() {
        let c = Clip::new(-0.5, None);
        assert_eq!((c.min_value(), c.max_value()), (-0.5, 0.5));
        let w = Tensor::new(vec![3], vec![-2.0, 0.3, 0.9]);
        assert_eq!(c.apply(&w).data, vec![-0.5, 0.3, 0.5]);
    }

    #[test]
    fn reversed_bounds_are_swapped() {
        let c = Clip::new(1.0, Some(-1.0));
        assert_eq!((c.min_value(), c.max_value()), (-1.0, 1.0));
        // omitted max with a positive min also ends up reversed
        assert_eq!(Clip::new(0.25, None), Clip::symmetric(0.25));
    }

    #[test]
    fn explicit_zero_max_is_kept() {
        let c = Clip::new(-1.0, Some(0.0));
        assert_eq!(c.max_value(), 0.0);
        assert_eq!(c.clamp(0.7), 0.0);
    }

    #[test]
    fn nan_clamps_to_min() {
        let mut w = Tensor::new(vec![2], vec![f32::NAN, 0.1]);
        Clip::symmetric(1.0).project(&mut w);
        assert_eq!(w.data, vec![-1.0, 0.1]);
    }

    #[test]
    fn config_serde() {
        let c = Clip::symmetric(0.5);
        let json = serde_json::to_value(c).unwrap();
        assert_eq!(json, serde_json::json!({"min_value": -0.5, "max_value": 0.5}));
        let back: Clip = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
        // deserialisation applies the same defaulting and swap
        let reversed: Clip = serde_json::from_str(r#"{"min_value": 0.5}"#).unwrap();
        assert_eq!(reversed, c);
    }

    proptest! {
        #[test]
        fn prop_clip_is_idempotent_and_bounded(
            xs in prop::collection::vec(-100f32..100.0, 1..64),
            h in 1e-3f32..10.0,
        ) {
            let c = Clip::symmetric(h);
            let once = c.apply(&Tensor::new(vec![xs.len()], xs));
            let twice = c.apply(&once);
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.data.iter().all(|&x| (-h..=h).contains(&x)));
        }

        #[test]
        fn prop_clip_with_any_bounds_is_ordered_and_idempotent(
            xs in prop::collection::vec(-100f32..100.0, 1..64),
            min in -10f32..10.0,
            max in prop::option::of(-10f32..10.0),
        ) {
            let c = Clip::new(min, max);
            prop_assert!(c.min_value() <= c.max_value());
            let mut once = Tensor::new(vec![xs.len()], xs);
            c.project(&mut once);
            let mut twice = once.clone();
            c.project(&mut twice);
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.data.iter().all(|&x| (c.min_value()..=c.max_value()).contains(&x)));
        }
    }
}
