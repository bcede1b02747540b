//! The layer template shared by every binarized-weight layer.
//!
//! [`QuantizedWeightLayer`] owns everything the dense and convolutional variants have in
//! common: scale resolution, latent weight allocation or injection, the range
//! constraint, binarization before each compute, bias, activation, backward assembly
//! and configuration. What differs between variants is injected as a
//! [`BaseComputation`].

use super::config::{Activation, LayerConfig};
use super::observe::WeightObserver;
use super::source::{SharedWeights, WeightSlot, WeightSource};
use super::{Forward, Layer, LayerGrads, Param, defined};
use crate::backprop;
use crate::error::{BnnError, Result};
use crate::quant::{Clip, Fan, ResolvedScale, ScaleSpec, WeightTransform, resolve};
use crate::tensors::{Ten32, TensorFloat, WithGrad};
use briny::prelude::*;
use log::{debug, trace};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backward function of a base computation: `dL/d(out)` to `(dL/d(input), dL/d(kernels))`.
pub type ComputeBackFn = dyn Fn(&Ten32) -> (Ten32, Vec<Ten32>) + Send + Sync;

/// The layer-specific part of a quantized layer.
///
/// Implementors are plain configuration values; their serde fields are flattened into
/// the layer's [`LayerConfig`].
pub trait BaseComputation: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Prefix of generated layer names.
    const KIND: &'static str;

    /// Checks an input shape and returns the dimension the kernels are built against
    /// (input features or channels).
    ///
    /// # Errors
    /// Fails on a wrong rank or an undefined feature/channel axis.
    fn input_dim(&self, input_shape: &[Option<usize>]) -> Result<usize>;

    /// Latent kernel slots and their shapes, in parameter order.
    fn kernel_shapes(&self, input_dim: usize) -> Vec<(WeightSlot, Vec<usize>)>;

    fn fan(&self, input_dim: usize) -> Fan;

    /// Length of the bias vector.
    fn bias_len(&self) -> usize;

    /// Output axis the bias is added along.
    fn bias_axis(&self, output_rank: usize) -> usize;

    fn transform(&self) -> WeightTransform {
        WeightTransform::Binarize
    }

    /// Checks the computation's own settings.
    ///
    /// # Errors
    /// Returns [`BnnError::InvalidConfig`] for zero sizes and similar.
    fn validate(&self) -> Result<()>;

    /// Runs the computation on the (binarized) kernels, given in
    /// [`Self::kernel_shapes`] order.
    ///
    /// # Errors
    /// Fails when the input cannot be processed, e.g. an empty convolution output.
    fn compute(&self, input: &Ten32, kernels: &[Ten32]) -> Result<(Ten32, Box<ComputeBackFn>)>;
}

static LAYER_UID: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn unique_name(kind: &str) -> String {
    format!("{kind}_{}", LAYER_UID.fetch_add(1, Ordering::Relaxed) + 1)
}

/// One latent kernel and the slot it fills.
#[derive(Debug, Clone)]
pub struct QuantizedKernel {
    pub slot: WeightSlot,
    pub param: Param,
}

#[derive(Debug)]
struct Built {
    input_dim: usize,
    scale: ResolvedScale,
    kernels: Vec<QuantizedKernel>,
    bias: Option<Param>,
}

/// A layer whose kernels are binarized to `±H` on every forward pass.
pub struct QuantizedWeightLayer<C: BaseComputation> {
    name: String,
    op: C,
    use_bias: bool,
    activation: Activation,
    h: ScaleSpec,
    kernel_lr_multiplier: ScaleSpec,
    bias_lr_multiplier: Option<ScaleSpec>,
    seed: Option<u64>,
    source: Option<Arc<dyn WeightSource>>,
    observer: Option<Arc<dyn WeightObserver>>,
    state: Option<Built>,
}

impl<C: BaseComputation> fmt::Debug for QuantizedWeightLayer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantizedWeightLayer")
            .field("name", &self.name)
            .field("op", &self.op)
            .field("h", &self.h)
            .field("built", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: BaseComputation> QuantizedWeightLayer<C> {
    /// Wraps `op` with the default settings: `H = 1`, automatic kernel learning-rate
    /// multiplier, no bias multiplier, zero-initialised bias, linear activation.
    pub fn with_op(op: C) -> Self {
        Self {
            name: unique_name(C::KIND),
            op,
            use_bias: true,
            activation: Activation::Linear,
            h: ScaleSpec::default(),
            kernel_lr_multiplier: ScaleSpec::Auto,
            bias_lr_multiplier: None,
            seed: None,
            source: None,
            observer: None,
            state: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_h(mut self, h: impl Into<ScaleSpec>) -> Self {
        self.h = h.into();
        self
    }

    #[must_use]
    pub fn with_kernel_lr_multiplier(mut self, multiplier: impl Into<ScaleSpec>) -> Self {
        self.kernel_lr_multiplier = multiplier.into();
        self
    }

    #[must_use]
    pub fn with_bias_lr_multiplier(mut self, multiplier: impl Into<ScaleSpec>) -> Self {
        self.bias_lr_multiplier = Some(multiplier.into());
        self
    }

    #[must_use]
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    #[must_use]
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Seeds the latent weight initialiser.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Takes initial latent weights from `source` instead of sampling them.
    #[must_use]
    pub fn with_weight_source(mut self, source: Arc<dyn WeightSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WeightObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn op(&self) -> &C {
        &self.op
    }

    pub(crate) fn op_mut(&mut self) -> &mut C {
        &mut self.op
    }

    /// Resolved scale, once built.
    pub fn scale(&self) -> Option<ResolvedScale> {
        self.state.as_ref().map(|s| s.scale)
    }

    /// Resolved `H`, once built.
    pub fn h(&self) -> Option<TensorFloat> {
        self.scale().map(|s| s.h)
    }

    /// Latent weight of `slot`, once built.
    pub fn kernel(&self, slot: WeightSlot) -> Option<&Ten32> {
        self.state
            .as_ref()?
            .kernels
            .iter()
            .find(|k| k.slot == slot)
            .map(|k| &k.param.weight.value)
    }

    pub fn bias(&self) -> Option<&Ten32> {
        self.state.as_ref()?.bias.as_ref().map(|b| &b.weight.value)
    }

    /// Compute view of `slot` as the next forward pass would use it.
    pub fn binarized_kernel(&self, slot: WeightSlot) -> Option<Ten32> {
        let h = self.h()?;
        let latent = self.kernel(slot)?;
        Some(self.op.transform().apply(latent, h).0)
    }

    /// Copies the latent kernels into a source another layer can be built from.
    pub fn export_weights(&self) -> SharedWeights {
        self.state
            .iter()
            .flat_map(|s| &s.kernels)
            .fold(SharedWeights::new(), |acc, k| acc.with(k.slot, k.param.weight.value.clone()))
    }

    /// Current configuration. Scale settings are the resolved values once built.
    pub fn config(&self) -> LayerConfig<C> {
        let (h, kernel_lr_multiplier, bias_lr_multiplier) = match &self.state {
            Some(built) => (
                ScaleSpec::Literal(built.scale.h),
                ScaleSpec::Literal(built.scale.kernel_lr_multiplier),
                built.scale.bias_lr_multiplier.map(ScaleSpec::Literal),
            ),
            None => (self.h, self.kernel_lr_multiplier, self.bias_lr_multiplier),
        };
        LayerConfig {
            name: self.name.clone(),
            op: self.op.clone(),
            use_bias: self.use_bias,
            activation: self.activation,
            h,
            kernel_lr_multiplier,
            bias_lr_multiplier,
        }
    }

    /// Creates a fresh, unbuilt layer from a configuration.
    ///
    /// # Errors
    /// Returns [`BnnError::InvalidConfig`] when the configuration fails validation.
    pub fn from_config(config: LayerConfig<C>) -> Result<Self> {
        let config = TrustedData::new(config)
            .map_err(|_| BnnError::InvalidConfig("invalid name or scale settings".to_owned()))?
            .into_inner();
        config.op.validate()?;
        Ok(Self {
            name: config.name,
            use_bias: config.use_bias,
            activation: config.activation,
            h: config.h,
            kernel_lr_multiplier: config.kernel_lr_multiplier,
            bias_lr_multiplier: config.bias_lr_multiplier,
            ..Self::with_op(config.op)
        })
    }

    /// [`Self::from_config`] on a JSON value as produced by [`Layer::get_config`].
    ///
    /// # Errors
    /// Fails when the value does not deserialise or does not validate.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Self::from_config(serde_json::from_value(value)?)
    }

    fn init_kernel(&self, slot: WeightSlot, shape: Vec<usize>, clip: Clip, rng: &mut StdRng) -> Result<Ten32> {
        match self.source.as_ref().and_then(|s| s.fetch(slot, &shape)) {
            Some(w) if w.shape != shape => Err(BnnError::ShapeMismatch {
                expected: shape,
                actual: w.shape,
            }),
            Some(w) => {
                debug!("{}/{slot}: using supplied weights", self.name);
                Ok(clip.apply(&w))
            }
            None => Ok(Ten32::uniform(shape, clip.min_value(), clip.max_value(), rng)),
        }
    }
}

impl<C: BaseComputation> Layer for QuantizedWeightLayer<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&mut self, input_shape: &[Option<usize>]) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }
        self.op.validate()?;
        let input_dim = self.op.input_dim(input_shape)?;
        let scale = resolve(self.h, self.kernel_lr_multiplier, self.bias_lr_multiplier, self.op.fan(input_dim))?;
        let clip = Clip::symmetric(scale.h);
        let mut rng = self.seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        let mut kernels = Vec::new();
        for (slot, shape) in self.op.kernel_shapes(input_dim) {
            let value = self.init_kernel(slot, shape, clip, &mut rng)?;
            kernels.push(QuantizedKernel {
                slot,
                param: Param {
                    name: format!("{}/{slot}", self.name),
                    weight: WithGrad::new(value),
                    constraint: Some(clip),
                    lr_multiplier: Some(scale.kernel_lr_multiplier),
                },
            });
        }

        let bias = self.use_bias.then(|| Param {
            name: format!("{}/bias", self.name),
            weight: WithGrad::new(Ten32::zeros(vec![self.op.bias_len()])),
            constraint: None,
            lr_multiplier: scale.bias_lr_multiplier,
        });

        debug!(
            "built {} on {input_shape:?}: H = {}, kernel_lr_multiplier = {}, bias_lr_multiplier = {:?}",
            self.name, scale.h, scale.kernel_lr_multiplier, scale.bias_lr_multiplier
        );
        self.state = Some(Built {
            input_dim,
            scale,
            kernels,
            bias,
        });
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.state.is_some()
    }

    fn forward(&mut self, input: &Ten32, _training: bool) -> Result<Forward> {
        let shape = defined(&input.shape);
        self.build(&shape)?;
        let Some(state) = &self.state else {
            return Err(BnnError::InvalidConfig(format!("{} is not built", self.name)));
        };

        let dim = self.op.input_dim(&shape)?;
        if dim != state.input_dim {
            return Err(BnnError::ShapeMismatch {
                expected: vec![state.input_dim],
                actual: vec![dim],
            });
        }

        let transform = self.op.transform();
        let h = state.scale.h;
        let mut views = Vec::with_capacity(state.kernels.len());
        let mut view_backs = Vec::with_capacity(state.kernels.len());
        for kernel in &state.kernels {
            let latent = &kernel.param.weight.value;
            let (view, back) = transform.apply(latent, h);
            if let Some(observer) = &self.observer {
                observer.observe(&self.name, kernel.slot, latent, &view);
            }
            views.push(view);
            view_backs.push(back);
        }

        let (mut output, compute_back) = self.op.compute(input, &views)?;
        let bias_back = match &state.bias {
            Some(bias) => {
                let (biased, back) = backprop::bias_add(&output, &bias.weight.value, self.op.bias_axis(output.rank()));
                output = biased;
                Some(back)
            }
            None => None,
        };
        let (output, activation_back) = self.activation.apply(&output);
        trace!("{} forward {:?} -> {:?}", self.name, input.shape, output.shape);

        let back = move |grad_output: &Ten32| {
            let grad = activation_back(grad_output);
            let (grad, grad_bias) = match &bias_back {
                Some(back) => {
                    let (grad, grad_bias) = back(&grad);
                    (grad, Some(grad_bias))
                }
                None => (grad, None),
            };
            let (input, kernel_grads) = compute_back(&grad);
            let mut params: Vec<Ten32> = kernel_grads
                .iter()
                .zip(&view_backs)
                .map(|(g, view_back)| view_back(g))
                .collect();
            params.extend(grad_bias);
            LayerGrads { input, params }
        };

        Ok(Forward {
            output,
            back: Box::new(back),
        })
    }

    fn params(&self) -> Vec<&Param> {
        self.state
            .iter()
            .flat_map(|s| s.kernels.iter().map(|k| &k.param).chain(s.bias.as_ref()))
            .collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.state
            .iter_mut()
            .flat_map(|s| s.kernels.iter_mut().map(|k| &mut k.param).chain(s.bias.as_mut()))
            .collect()
    }

    fn get_config(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.config())?)
    }
}
