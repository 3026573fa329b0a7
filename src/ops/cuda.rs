use crate::ops::wgpu::GpuFailure;
use crate::ops::{ConvGeometry, PoolGeometry};
use crate::tensor::{DType, TensorDesc};

pub fn available() -> bool {
    // TODO: implement using `cust` crate
    super::wgpu::available() // wgpu fallback
}

#[allow(clippy::too_many_arguments)]
pub fn conv2d_direct(
    src: &[f32],
    weights: &[f32],
    bias: &[f32],
    shape: &TensorDesc,
    outputs: usize,
    kernel: usize,
    geom: &ConvGeometry,
    dst: &mut [f32],
) -> Result<(), GpuFailure> {
    // TODO: implement using `cust` crate
    super::wgpu::conv2d_direct(src, weights, bias, shape, outputs, kernel, geom, dst)
}

#[allow(clippy::too_many_arguments)]
pub fn fully_connected(
    src: &[f32],
    weights: &[f32],
    bias: &[f32],
    batch: usize,
    in_features: usize,
    out_features: usize,
    dtype: DType,
    dst: &mut [f32],
) -> Result<(), GpuFailure> {
    // TODO: implement using GPU kernel
    super::wgpu::fully_connected(src, weights, bias, batch, in_features, out_features, dtype, dst)
}

pub fn relu(src: &[f32], dst: &mut [f32]) -> Result<(), GpuFailure> {
    // TODO: implement GPU ReLU
    super::wgpu::relu(src, dst) // wgpu fallback
}

pub fn max_pool(
    src: &[f32],
    shape: &TensorDesc,
    geom: &PoolGeometry,
    dst: &mut [f32],
) -> Result<(), GpuFailure> {
    // TODO: implement GPU pooling
    super::wgpu::max_pool(src, shape, geom, dst) // wgpu fallback
}
