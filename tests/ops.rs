use forgenet::ops::cpu::{
    conv2d_direct, conv2d_im2col, fully_connected, gemm, lrn_cross_channel, max_pool, relu,
    softmax_channel,
};
use forgenet::ops::{ConvGeometry, LrnParams, PoolGeometry};
use forgenet::tensor::{DType, TensorDesc};

#[test]
fn test_gemm_small() {
    let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
    let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0]; // 3x2
    let mut out = [0.0f32; 4];
    gemm(&a, &b, 2, 3, 2, &mut out);
    assert_eq!(out, [58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn test_conv_identity_kernel() {
    let src = [1.0, -2.0, 3.0, 4.0];
    let shape = TensorDesc::new(1, 1, 2, 2);
    let mut dst = [0.0f32; 4];
    conv2d_direct(
        &src,
        &[1.0],
        &[0.5],
        &shape,
        1,
        1,
        &ConvGeometry::default(),
        &mut dst,
    );
    assert_eq!(dst, [1.5, -1.5, 3.5, 4.5]);
}

#[test]
fn test_conv_valid_output_size() {
    // out = in - kernel + 1 under zero padding, unit stride
    let src: Vec<f32> = (0..25).map(|v| v as f32).collect();
    let shape = TensorDesc::new(1, 1, 5, 5);
    let geom = ConvGeometry::default();
    assert_eq!(geom.out_dim(5, 3), Some(3));

    let weights = vec![1.0f32; 9];
    let mut dst = vec![0.0f32; 9];
    conv2d_direct(&src, &weights, &[0.0], &shape, 1, 3, &geom, &mut dst);
    // top-left window: rows 0..3 x cols 0..3
    assert_eq!(dst[0], 54.0);
    // bottom-right window: rows 2..5 x cols 2..5
    assert_eq!(dst[8], 162.0);
}

#[test]
fn test_conv_zero_padding() {
    let src = [1.0f32; 9];
    let shape = TensorDesc::new(1, 1, 3, 3);
    let geom = ConvGeometry {
        pad: 1,
        stride: 1,
        dilation: 1,
    };
    assert_eq!(geom.out_dim(3, 3), Some(3));

    let weights = vec![1.0f32; 9];
    let mut dst = vec![0.0f32; 9];
    conv2d_direct(&src, &weights, &[0.0], &shape, 1, 3, &geom, &mut dst);
    // corner sees a 2x2 live region, center the full 3x3
    assert_eq!(dst[0], 4.0);
    assert_eq!(dst[4], 9.0);
}

#[test]
fn test_conv_direct_and_im2col_agree() {
    let shape = TensorDesc::new(2, 3, 6, 6);
    let outputs = 4;
    let kernel = 3;
    let geom = ConvGeometry::default();

    let src: Vec<f32> = (0..shape.elem_count()).map(|v| (v % 13) as f32 - 6.0).collect();
    let weights: Vec<f32> = (0..outputs * 3 * 9).map(|v| (v % 7) as f32 * 0.25 - 0.5).collect();
    let bias = [0.1, -0.2, 0.3, 0.0];

    let oh = geom.out_dim(6, kernel).unwrap();
    let ow = oh;
    let mut direct = vec![0.0f32; 2 * outputs * oh * ow];
    let mut lowered = vec![0.0f32; 2 * outputs * oh * ow];
    let mut workspace = vec![0.0f32; 3 * kernel * kernel * oh * ow];

    conv2d_direct(&src, &weights, &bias, &shape, outputs, kernel, &geom, &mut direct);
    conv2d_im2col(
        &src, &weights, &bias, &shape, outputs, kernel, &geom, &mut workspace, &mut lowered,
    );

    for (a, b) in direct.iter().zip(&lowered) {
        assert!((a - b).abs() < 1e-5, "direct {a} vs im2col {b}");
    }
}

#[test]
fn test_max_pool_halves_dimensions() {
    let geom = PoolGeometry::default();
    assert_eq!(geom.out_dim(4), Some(2));
    assert_eq!(geom.out_dim(5), Some(2));
    assert_eq!(geom.out_dim(28), Some(14));

    let src: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let shape = TensorDesc::new(1, 1, 4, 4);
    let mut dst = [0.0f32; 4];
    max_pool(&src, &shape, &geom, &mut dst);
    assert_eq!(dst, [5.0, 7.0, 13.0, 15.0]);
}

#[test]
fn test_max_pool_propagates_nan() {
    let src = [1.0, f32::NAN, 0.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let shape = TensorDesc::new(1, 1, 4, 4);
    let mut dst = [0.0f32; 4];
    max_pool(&src, &shape, &PoolGeometry::default(), &mut dst);
    assert!(dst[0].is_nan());
    assert_eq!(dst[1], 2.0);
}

#[test]
fn test_relu_propagates_nan() {
    let src = [-1.0, 0.0, 2.0, f32::NAN];
    let mut dst = [0.0f32; 4];
    relu(&src, &mut dst);
    assert_eq!(dst[0], 0.0);
    assert_eq!(dst[1], 0.0);
    assert_eq!(dst[2], 2.0);
    assert!(dst[3].is_nan());
}

#[test]
fn test_fully_connected_matvec() {
    let weights = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 3 outputs x 2 inputs
    let bias = [0.5, 0.0, 0.0];
    let src = [1.0, 1.0];
    let mut dst = [0.0f32; 3];
    fully_connected(&src, &weights, &bias, 1, 2, 3, DType::F32, &mut dst);
    assert_eq!(dst, [3.5, 7.0, 11.0]);
}

#[test]
fn test_fully_connected_batched() {
    let weights = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let bias = [0.5, 0.0, 0.0];
    let src = [1.0, 1.0, 2.0, 0.0];
    let mut dst = [0.0f32; 6];
    fully_connected(&src, &weights, &bias, 2, 2, 3, DType::F32, &mut dst);
    assert_eq!(&dst[..3], &[3.5, 7.0, 11.0]);
    assert_eq!(&dst[3..], &[2.5, 6.0, 10.0]);
}

#[test]
fn test_lrn_single_channel() {
    let params = LrnParams::default();
    let src = [2.0f32];
    let shape = TensorDesc::new(1, 1, 1, 1);
    let mut dst = [0.0f32];
    lrn_cross_channel(&src, &shape, &params, &mut dst);

    let denom = (1.0 + 1e-4 / 5.0 * 4.0f32).powf(0.75);
    assert!((dst[0] - 2.0 / denom).abs() < 1e-6);
}

#[test]
fn test_lrn_preserves_shape_and_window_clamps() {
    let shape = TensorDesc::new(1, 3, 1, 1);
    let src = [1.0, 2.0, 3.0];
    let mut dst = [0.0f32; 3];
    lrn_cross_channel(&src, &shape, &LrnParams::default(), &mut dst);
    // every channel window clamps to all three channels here
    let denom = (1.0 + 1e-4 / 5.0 * 14.0f32).powf(0.75);
    for (y, x) in dst.iter().zip(&src) {
        assert!((y - x / denom).abs() < 1e-6);
    }
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let shape = TensorDesc::new(2, 4, 1, 1);
    let src = [0.0, 1.0, 2.0, 3.0, -5.0, 0.0, 5.0, 10.0];
    let mut dst = [0.0f32; 8];
    softmax_channel(&src, &shape, &mut dst);

    for row in dst.chunks(4) {
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}

#[test]
fn test_softmax_stable_for_large_inputs() {
    let shape = TensorDesc::new(1, 3, 1, 1);
    let src = [1000.0, 1000.0, 1000.0];
    let mut dst = [0.0f32; 3];
    softmax_channel(&src, &shape, &mut dst);
    for &v in &dst {
        assert!((v - 1.0 / 3.0).abs() < 1e-6);
    }
}

#[test]
fn test_softmax_per_spatial_position() {
    // channel mode: each (h, w) position normalizes independently
    let shape = TensorDesc::new(1, 2, 1, 2);
    let src = [0.0, 3.0, 0.0, 3.0]; // c0: [0, 3], c1: [0, 3]
    let mut dst = [0.0f32; 4];
    softmax_channel(&src, &shape, &mut dst);
    assert!((dst[0] + dst[2] - 1.0).abs() < 1e-6);
    assert!((dst[1] + dst[3] - 1.0).abs() < 1e-6);
    assert!((dst[0] - 0.5).abs() < 1e-6);
}

#[test]
fn test_f16_path_rounds_operands() {
    let shape = TensorDesc::new(1, 1, 1, 1).with_dtype(DType::F16);
    let src = [1.0f32];
    let mut dst = [0.0f32];
    conv2d_direct(&src, &[0.1], &[0.0], &shape, 1, 1, &ConvGeometry::default(), &mut dst);
    assert_eq!(dst[0], DType::F16.quantize(0.1));
    assert_ne!(dst[0], 0.1f32);
}
