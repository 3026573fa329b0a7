use forgenet::algo::{AlgoSelector, ConvAlgorithm, ConvSignature};
use forgenet::error::EngineError;
use forgenet::network::{ConvGeometry, Layer, Network, PoolGeometry};
use forgenet::tensor::TensorDesc;
use forgenet::weights::LayerParams;

fn zero_conv(inputs: usize, outputs: usize, kernel: usize) -> LayerParams {
    LayerParams::from_host(
        inputs,
        outputs,
        kernel,
        vec![0.0; inputs * outputs * kernel * kernel],
        vec![0.0; outputs],
    )
    .unwrap()
}

/// The reference digit topology with zero weights everywhere and the final
/// bias set to `{1, 0, 0, ...}`.
fn zero_lenet() -> Network {
    let conv1 = zero_conv(1, 2, 5);
    let conv2 = zero_conv(2, 4, 5);
    let ip1 = zero_conv(4 * 4 * 4, 16, 1);
    let mut bias = vec![0.0; 10];
    bias[0] = 1.0;
    let ip2 = LayerParams::from_host(16, 10, 1, vec![0.0; 160], bias).unwrap();
    Network::lenet(conv1, conv2, ip1, ip2)
}

#[test]
fn test_shape_propagation_through_reference_pipeline() {
    let mut net = zero_lenet();
    let input = vec![0.0f32; 28 * 28];
    let (shape, scores) = net.forward(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();
    // 28 -conv5-> 24 -pool-> 12 -conv5-> 8 -pool-> 4, then 64 -> 16 -> 10
    assert_eq!((shape.n, shape.c, shape.h, shape.w), (1, 10, 1, 1));
    assert_eq!(scores.len(), 10);
}

#[test]
fn test_zero_weights_yield_near_uniform_distribution() {
    let mut net = zero_lenet();
    let input = vec![0.0f32; 28 * 28];
    let result = net.classify(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();

    let sum: f32 = result.scores.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
    // bias breaks uniformity only in class 0
    assert_eq!(result.label, 0);
    assert!(result.scores[0] > result.scores[1]);
    for pair in result.scores[1..].windows(2) {
        assert!((pair[0] - pair[1]).abs() < 1e-6);
    }
}

#[test]
fn test_forward_is_deterministic() {
    let mut net = zero_lenet();
    let input: Vec<f32> = (0..28 * 28).map(|_| rand::random::<f32>()).collect();
    let a = net.classify(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();
    let b = net.classify(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();
    assert_eq!(a.scores, b.scores);
    assert_eq!(a.label, b.label);
}

#[test]
fn test_algorithm_cache_is_idempotent() {
    let mut net = zero_lenet();
    let input = vec![0.0f32; 28 * 28];

    net.classify(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();
    let after_first = net.selector().len();
    assert_eq!(after_first, 2); // one signature per convolution layer

    net.classify(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();
    assert_eq!(net.selector().len(), after_first);
}

#[test]
fn test_selector_reuses_choice_for_same_signature() {
    let mut selector = AlgoSelector::new();
    let shape = TensorDesc::new(1, 1, 8, 8);
    let sig = ConvSignature::new(&shape, 1, 2, 3, &ConvGeometry::default());

    let first = selector.choose(&sig).unwrap();
    let second = selector.choose(&sig).unwrap();
    assert_eq!(first, second);
    assert_eq!(selector.len(), 1);
    assert!(selector.cached(&sig).is_some());
}

#[test]
fn test_selector_pin_and_invalidate() {
    let mut selector = AlgoSelector::new();
    let shape = TensorDesc::new(1, 1, 8, 8);
    let sig = ConvSignature::new(&shape, 1, 2, 3, &ConvGeometry::default());

    selector.pin(sig.clone(), ConvAlgorithm::Im2col);
    assert_eq!(selector.choose(&sig).unwrap(), ConvAlgorithm::Im2col);

    selector.invalidate(&sig);
    assert!(selector.cached(&sig).is_none());
}

#[test]
fn test_classify_rejects_batched_input() {
    let mut net = zero_lenet();
    let input = vec![0.0f32; 2 * 28 * 28];
    let err = net
        .classify(&input, TensorDesc::new(2, 1, 28, 28))
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch { .. }));
}

#[test]
fn test_classify_batch_handles_two_samples() {
    let mut net = zero_lenet();
    let input = vec![0.0f32; 2 * 28 * 28];
    let results = net
        .classify_batch(&input, TensorDesc::new(2, 1, 28, 28))
        .unwrap();

    assert_eq!(results.len(), 2);
    for result in results {
        let sum: f32 = result.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(result.label, 0);
    }
}

#[test]
fn test_fully_connected_rejects_feature_mismatch() {
    let fc = zero_conv(8, 4, 1);
    let mut net = Network::new(vec![Layer::FullyConnected { params: fc }]);
    let err = net
        .forward(&vec![0.0f32; 6], TensorDesc::new(1, 6, 1, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ShapeMismatch {
            op: "fully_connected",
            ..
        }
    ));
}

#[test]
fn test_conv_rejects_oversized_kernel() {
    let conv = zero_conv(1, 1, 5);
    let mut net = Network::new(vec![Layer::Conv {
        params: conv,
        geometry: ConvGeometry::default(),
    }]);
    let err = net
        .forward(&vec![0.0f32; 9], TensorDesc::new(1, 1, 3, 3))
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch { op: "conv", .. }));
}

#[test]
fn test_pool_rejects_undersized_input() {
    let mut net = Network::new(vec![Layer::Pool(PoolGeometry {
        window: 4,
        stride: 4,
    })]);
    let err = net
        .forward(&vec![0.0f32; 9], TensorDesc::new(1, 1, 3, 3))
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch { op: "pool", .. }));
}

#[test]
fn test_input_length_must_match_descriptor() {
    let mut net = zero_lenet();
    let err = net
        .forward(&vec![0.0f32; 10], TensorDesc::new(1, 1, 28, 28))
        .unwrap_err();
    assert!(matches!(err, EngineError::ShapeMismatch { op: "input", .. }));
}

#[test]
fn test_weight_file_size_mismatch_is_io_error() {
    let dir = std::env::temp_dir();
    let weights_path = dir.join("forgenet_test_bad_weights.bin");
    let bias_path = dir.join("forgenet_test_bad_bias.bin");

    // 3 floats where the geometry demands 1*1*2*2 = 4
    std::fs::write(&weights_path, [0u8; 12]).unwrap();
    std::fs::write(&bias_path, [0u8; 4]).unwrap();

    let err = LayerParams::load(1, 1, 2, &weights_path, &bias_path).unwrap_err();
    assert!(matches!(err, EngineError::Io { .. }));

    std::fs::remove_file(&weights_path).ok();
    std::fs::remove_file(&bias_path).ok();
}

#[test]
fn test_weight_file_roundtrip() {
    let dir = std::env::temp_dir();
    let weights_path = dir.join("forgenet_test_ok_weights.bin");
    let bias_path = dir.join("forgenet_test_ok_bias.bin");

    let weights = [0.25f32, -1.0, 3.5, 0.0];
    let bias = [0.5f32];
    let mut bytes = Vec::new();
    for v in weights {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(&weights_path, &bytes).unwrap();
    std::fs::write(&bias_path, bias[0].to_le_bytes()).unwrap();

    let params = LayerParams::load(1, 1, 2, &weights_path, &bias_path).unwrap();
    assert_eq!(params.weights_host(), &weights);
    assert_eq!(params.bias_host(), &bias);
    assert_eq!(params.weights().as_slice(), &weights);

    std::fs::remove_file(&weights_path).ok();
    std::fs::remove_file(&bias_path).ok();
}

#[test]
fn test_missing_weight_file_is_io_error() {
    let dir = std::env::temp_dir();
    let err = LayerParams::load(
        1,
        1,
        2,
        &dir.join("forgenet_test_does_not_exist.bin"),
        &dir.join("forgenet_test_does_not_exist_either.bin"),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Io { .. }));
}

#[test]
fn test_release_is_idempotent() {
    let mut params = zero_conv(1, 2, 3);
    params.release();
    assert!(params.weights().is_empty());
    params.release();
    assert!(params.weights().is_empty());
}

#[test]
fn test_half_precision_pass_stays_normalized() {
    use forgenet::tensor::DType;

    let mut net = zero_lenet().with_dtype(DType::F16);
    let input: Vec<f32> = (0..28 * 28).map(|v| (v % 17) as f32 / 16.0).collect();
    let result = net.classify(&input, TensorDesc::new(1, 1, 28, 28)).unwrap();
    let sum: f32 = result.scores.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
}
