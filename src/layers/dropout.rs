//! Dropout without output rescaling.

use super::quantized::unique_name;
use super::{Forward, Layer, LayerGrads, Param};
use crate::error::{BnnError, Result};
use crate::tensors::{Ten32, Tensor, TensorFloat};
use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Persisted configuration of a [`DropoutNoScale`] layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    pub name: String,
    pub rate: TensorFloat,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Zeroes each element with probability `rate` during training.
///
/// Unlike the usual dropout, kept elements are *not* divided by `1 - rate`, so the
/// expected activation shrinks during training. Outside training, and for rates of 0
/// or 1, the layer is the identity.
#[derive(Debug)]
pub struct DropoutNoScale {
    name: String,
    rate: TensorFloat,
    seed: Option<u64>,
    rng: StdRng,
}

impl DropoutNoScale {
    /// # Errors
    /// Returns [`BnnError::InvalidConfig`] unless `rate` lies in `[0, 1]`.
    pub fn new(rate: TensorFloat) -> Result<Self> {
        Self::from_config(DropoutConfig {
            name: unique_name("dropout_no_scale"),
            rate,
            seed: None,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn rate(&self) -> TensorFloat {
        self.rate
    }

    fn active(&self, training: bool) -> bool {
        training && self.rate > 0.0 && self.rate < 1.0
    }

    pub fn config(&self) -> DropoutConfig {
        DropoutConfig {
            name: self.name.clone(),
            rate: self.rate,
            seed: self.seed,
        }
    }

    /// # Errors
    /// Returns [`BnnError::InvalidConfig`] unless `rate` lies in `[0, 1]`.
    pub fn from_config(config: DropoutConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.rate) {
            return Err(BnnError::InvalidConfig(format!(
                "dropout rate must lie in [0, 1], got {}",
                config.rate
            )));
        }
        if config.rate >= 1.0 {
            warn!("{}: dropout rate {} disables dropout", config.name, config.rate);
        }
        let rng = config.seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Ok(Self {
            name: config.name,
            rate: config.rate,
            seed: config.seed,
            rng,
        })
    }
}

impl Layer for DropoutNoScale {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&mut self, _input_shape: &[Option<usize>]) -> Result<()> {
        Ok(())
    }

    fn is_built(&self) -> bool {
        true
    }

    fn forward(&mut self, input: &Ten32, training: bool) -> Result<Forward> {
        if !self.active(training) {
            return Ok(Forward {
                output: input.clone(),
                back: Box::new(|grad: &Ten32| LayerGrads {
                    input: grad.clone(),
                    params: Vec::new(),
                }),
            });
        }

        let keep = 1.0 - self.rate;
        let mask: Vec<TensorFloat> = (0..input.len())
            .map(|_| if self.rng.random::<TensorFloat>() < keep { 1.0 } else { 0.0 })
            .collect();
        let data = input.data.iter().zip(&mask).map(|(x, m)| x * m).collect();
        let output = Tensor::new(input.shape.clone(), data);

        let back = move |grad: &Ten32| {
            let data = grad.data.iter().zip(&mask).map(|(g, m)| g * m).collect();
            LayerGrads {
                input: Tensor::new(grad.shape.clone(), data),
                params: Vec::new(),
            }
        };

        Ok(Forward {
            output,
            back: Box::new(back),
        })
    }

    fn params(&self) -> Vec<&Param> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }

    fn get_config(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.config())?)
    }
}
