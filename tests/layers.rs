use briny_bnn::backprop::{conv2d, depthwise_conv2d, mse_loss};
use briny_bnn::layers::{
    Activation, BinaryConv2D, BinaryDense, DataFormat, DepthwiseBinaryConv2D, Layer, LogObserver, Padding,
    SharedWeights, WeightObserver, WeightSlot,
};
use briny_bnn::ops::cpu::{Conv2dGeometry, nchw_to_nhwc};
use briny_bnn::optim::Sgd;
use briny_bnn::quant::ScaleSpec;
use briny_bnn::tensors::{Ten32, Tensor};
use briny_bnn::{BnnError, tensor};
use std::sync::{Arc, Mutex};

fn fixed_dense() -> BinaryDense {
    let source = SharedWeights::new().with(WeightSlot::Kernel, tensor!([[0.3], [-0.8]]));
    BinaryDense::new(1)
        .with_h(1.0f32)
        .with_bias(false)
        .with_activation(Activation::Linear)
        .with_weight_source(Arc::new(source))
}

#[test]
fn dense_end_to_end_with_fixed_latent_weights() {
    let mut layer = fixed_dense();
    let out = layer.forward(&tensor!([[1.0, 1.0]]), false).unwrap();
    assert_eq!(layer.binarized_kernel(WeightSlot::Kernel).unwrap(), tensor!([[1.0], [-1.0]]));
    assert_eq!(out.output, tensor!([[0.0]]));

    let out = layer.forward(&tensor!([[2.0, 0.0]]), false).unwrap();
    assert_eq!(out.output, tensor!([[2.0]]));
}

#[test]
fn dense_gradient_reaches_only_in_range_latent_weights() {
    let source = SharedWeights::new().with(WeightSlot::Kernel, tensor!([[0.5], [-0.25]]));
    let mut layer = BinaryDense::new(1)
        .with_h(0.5f32)
        .with_bias(false)
        .with_weight_source(Arc::new(source));
    let fwd = layer.forward(&tensor!([[3.0, 4.0]]), true).unwrap();
    assert_eq!(fwd.output, tensor!([[-0.5]]));

    let grads = (fwd.back)(&tensor!([[1.0]]));
    // the latent weights sit on the boundary and inside it, so both pass
    assert_eq!(grads.params[0], tensor!([[3.0], [4.0]]));
    // input gradient flows through the binarized kernel
    assert_eq!(grads.input, tensor!([[0.5, -0.5]]));
}

#[test]
fn config_round_trip_reproduces_scale() {
    let mut dense = BinaryDense::new(256)
        .with_h(ScaleSpec::Auto)
        .with_bias_lr_multiplier(ScaleSpec::Auto);
    dense.build(&[None, Some(784)]).unwrap();
    let config = dense.get_config().unwrap();
    assert!(config["H"].is_number());
    let mut restored = BinaryDense::from_json(config.clone()).unwrap();
    assert!(!restored.is_built());
    restored.build(&[None, Some(784)]).unwrap();
    assert_eq!(restored.scale(), dense.scale());
    assert_eq!(restored.get_config().unwrap(), config);

    let mut conv = BinaryConv2D::new(32, (3, 3))
        .with_h(ScaleSpec::Auto)
        .with_strides((2, 2))
        .with_padding(Padding::Same);
    conv.build(&[None, Some(28), Some(28), Some(16)]).unwrap();
    let mut restored = BinaryConv2D::from_json(conv.get_config().unwrap()).unwrap();
    restored.build(&[None, Some(28), Some(28), Some(16)]).unwrap();
    assert_eq!(restored.scale(), conv.scale());
    assert_eq!(restored.op(), conv.op());

    let mut separable = DepthwiseBinaryConv2D::new(8, (3, 3))
        .with_depth_multiplier(2)
        .with_h(ScaleSpec::Auto)
        .with_kernel_lr_multiplier(3.0f32);
    separable.build(&[None, Some(12), Some(12), Some(4)]).unwrap();
    let mut restored = DepthwiseBinaryConv2D::from_json(separable.get_config().unwrap()).unwrap();
    restored.build(&[None, Some(12), Some(12), Some(4)]).unwrap();
    assert_eq!(restored.scale(), separable.scale());
    assert_eq!(restored.op().depth_multiplier, 2);
    assert_eq!(restored.scale().unwrap().kernel_lr_multiplier, 3.0);
}

#[test]
fn unbuilt_config_keeps_auto_sentinels() {
    let layer = BinaryDense::new(4).with_h(ScaleSpec::Auto).with_name("fc");
    let config = layer.get_config().unwrap();
    assert_eq!(config["name"], "fc");
    assert_eq!(config["H"], "auto");
    assert_eq!(config["kernel_lr_multiplier"], "auto");
    assert!(config["bias_lr_multiplier"].is_null());
}

#[test]
fn conv_requires_defined_channels_and_rank_four() {
    let mut layer = BinaryConv2D::new(2, (3, 3));
    assert!(matches!(
        layer.build(&[None, Some(5), Some(5), None]),
        Err(BnnError::UndefinedChannel { .. })
    ));
    assert!(matches!(
        layer.forward(&Tensor::zeros(vec![5, 5, 1]), false),
        Err(BnnError::InvalidRank { expected: 4, actual: 3 })
    ));
}

#[test]
fn non_positive_h_is_rejected() {
    let mut layer = BinaryDense::new(2).with_h(0.0f32);
    assert!(matches!(layer.build(&[None, Some(3)]), Err(BnnError::InvalidScale(_))));
    assert!(BinaryDense::from_json(serde_json::json!({"name": "d", "units": 2, "H": -1.0})).is_err());
}

#[test]
fn huge_h_fails_build_instead_of_init() {
    let mut layer = BinaryDense::new(1).with_h(3.0e38f32);
    assert!(matches!(layer.build(&[None, Some(2)]), Err(BnnError::InvalidScale(_))));
    assert!(!layer.is_built());
}

#[test]
fn channels_first_matches_channels_last() {
    let kernel = Tensor::new(vec![2, 2, 3, 2], (0..24).map(|i| (i % 5) as f32 / 5.0 - 0.4).collect());
    let source = Arc::new(SharedWeights::new().with(WeightSlot::Kernel, kernel));
    let nchw = Tensor::new(vec![1, 3, 4, 4], (0..48).map(|i| (i % 7) as f32 - 3.0).collect());

    let mut first = BinaryConv2D::new(2, (2, 2))
        .with_data_format(DataFormat::ChannelsFirst)
        .with_padding(Padding::Same)
        .with_weight_source(source.clone());
    let mut last = BinaryConv2D::new(2, (2, 2))
        .with_padding(Padding::Same)
        .with_weight_source(source);

    let out_first = first.forward(&nchw, false).unwrap().output;
    let out_last = last.forward(&nchw_to_nhwc(&nchw), false).unwrap().output;
    assert_eq!(out_first.shape, vec![1, 2, 4, 4]);
    assert_eq!(nchw_to_nhwc(&out_first), out_last);
}

#[test]
fn depthwise_matches_explicit_two_stage_convolution() {
    let mut layer = DepthwiseBinaryConv2D::new(3, (3, 3))
        .with_depth_multiplier(2)
        .with_h(ScaleSpec::Auto)
        .with_strides((2, 2))
        .with_bias(false)
        .with_seed(21);
    let input = Tensor::new(vec![2, 6, 6, 2], (0..144).map(|i| ((i * 5) % 9) as f32 - 4.0).collect());
    let out = layer.forward(&input, false).unwrap().output;

    let h = layer.h().unwrap();
    let depthwise = layer.binarized_kernel(WeightSlot::DepthwiseKernel).unwrap();
    let pointwise = layer.binarized_kernel(WeightSlot::PointwiseKernel).unwrap();
    assert!(depthwise.data.iter().chain(&pointwise.data).all(|&w| w == h || w == -h));

    let geometry = Conv2dGeometry {
        strides: (2, 2),
        ..Default::default()
    };
    let (mid, _) = depthwise_conv2d(&input, &depthwise, geometry);
    let (expected, _) = conv2d(&mid, &pointwise, Conv2dGeometry::default());
    assert_eq!(out.shape, vec![2, 2, 2, 3]);
    assert_eq!(out, expected);
}

#[test]
fn weights_exported_from_one_layer_seed_another() {
    let mut trained = DepthwiseBinaryConv2D::new(2, (1, 1)).with_seed(4);
    trained.build(&[None, Some(3), Some(3), Some(2)]).unwrap();
    let mut copy = DepthwiseBinaryConv2D::new(2, (1, 1)).with_weight_source(Arc::new(trained.export_weights()));
    copy.build(&[None, Some(3), Some(3), Some(2)]).unwrap();
    for slot in [WeightSlot::DepthwiseKernel, WeightSlot::PointwiseKernel] {
        assert_eq!(copy.kernel(slot), trained.kernel(slot));
    }
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, WeightSlot, Vec<f32>)>>,
}

impl WeightObserver for Recorder {
    fn observe(&self, layer: &str, slot: WeightSlot, _latent: &Ten32, binarized: &Ten32) {
        self.calls
            .lock()
            .unwrap()
            .push((layer.to_owned(), slot, binarized.data.clone()));
    }
}

#[test]
fn observer_sees_every_binarized_kernel() {
    let recorder = Arc::new(Recorder::default());
    let mut layer = DepthwiseBinaryConv2D::new(1, (1, 1))
        .with_name("sep")
        .with_observer(recorder.clone());
    let input = Tensor::new(vec![1, 2, 2, 1], vec![1.0; 4]);
    layer.forward(&input, false).unwrap();
    layer.forward(&input, false).unwrap();

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].0, "sep");
    assert_eq!(calls[0].1, WeightSlot::DepthwiseKernel);
    assert_eq!(calls[1].1, WeightSlot::PointwiseKernel);
    assert!(calls.iter().all(|(_, _, w)| w.iter().all(|&v| v.abs() == 1.0)));
}

#[test]
fn log_observer_can_be_attached() {
    let observer = Arc::new(LogObserver::default());
    let mut layer = BinaryDense::new(2).with_observer(observer.clone());
    for _ in 0..5 {
        layer.forward(&tensor!([[1.0, 2.0, 3.0]]), false).unwrap();
    }
    assert_eq!(observer.seen(), 5);
}

#[test]
fn training_keeps_latent_weights_in_range() {
    let mut layer = BinaryDense::new(2)
        .with_h(ScaleSpec::Auto)
        .with_activation(Activation::Tanh)
        .with_seed(8);
    let sgd = Sgd::new(0.5);
    let x = tensor!([[1.0, -2.0, 0.5], [0.0, 1.0, -1.0]]);
    let y = tensor!([[1.0, -1.0], [-1.0, 1.0]]);

    layer.build(&[None, Some(3)]).unwrap();
    let initial = layer.kernel(WeightSlot::Kernel).unwrap().clone();

    for _ in 0..20 {
        let fwd = layer.forward(&x, true).unwrap();
        let (_, loss_back) = mse_loss(&fwd.output, &y);
        let grads = (fwd.back)(&loss_back(1.0));
        layer.accumulate_grads(&grads).unwrap();
        sgd.step(&mut layer);

        let h = layer.h().unwrap();
        let kernel = layer.kernel(WeightSlot::Kernel).unwrap();
        assert!(kernel.data.iter().all(|w| w.abs() <= h));
    }
    assert_ne!(layer.kernel(WeightSlot::Kernel).unwrap(), &initial);
}
