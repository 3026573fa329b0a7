//! Operator Dispatch Layer
//!
//! This module selects the correct backend (CPU, WGPU, CUDA) at runtime for
//! each forward operator, based on the global `Backend`.
//!
//! Each operator attempts backend-specific implementations in priority order:
//! 1. `Cuda` (if enabled)
//! 2. `Wgpu` (if enabled)
//! 3. Falls back to `Cpu`
//!
//! # Design Highlights
//! - **Pluggable**: Backends are optional and modular
//! - **Minimal overhead**: One backend check per operator call
//! - **Fallback logic**: A GPU backend that never initialized falls back to
//!   CPU; a kernel that launched and then failed is a
//!   [`EngineError::DeviceCompute`](crate::error::EngineError::DeviceCompute) — the pass must not continue on a
//!   buffer in an unknown state.
//!
//! LRN and softmax have no GPU kernels and always run on CPU; the
//! convolution `Im2col` algorithm is likewise a CPU-side lowering, so only
//! `Direct` convolutions are offered to the GPU.

use crate::algo::ConvAlgorithm;
use crate::backend::{Backend, get_backend};
use crate::error::Result;
use crate::ops::{ConvGeometry, LrnParams, PoolGeometry, cpu};
use crate::tensor::{DType, TensorDesc};

#[cfg(any(feature = "wgpu", feature = "cuda"))]
fn device_err(e: impl core::fmt::Display) -> crate::error::EngineError {
    crate::error::EngineError::DeviceCompute(e.to_string())
}

/// Dispatches one convolution to the selected backend.
///
/// `workspace` is scratch sized for `algo` by the caller; the `Direct`
/// algorithm ignores it.
///
/// # Errors
///
/// [`EngineError::DeviceCompute`](crate::error::EngineError::DeviceCompute) when a launched GPU kernel fails.
#[allow(clippy::too_many_arguments)]
pub fn conv2d(
    algo: ConvAlgorithm,
    src: &[f32],
    weights: &[f32],
    bias: &[f32],
    shape: &TensorDesc,
    outputs: usize,
    kernel: usize,
    geom: &ConvGeometry,
    workspace: &mut [f32],
    dst: &mut [f32],
) -> Result<()> {
    if algo == ConvAlgorithm::Direct {
        match get_backend() {
            Backend::Cuda => {
                #[cfg(feature = "cuda")]
                {
                    if super::cuda::available() {
                        return super::cuda::conv2d_direct(
                            src, weights, bias, shape, outputs, kernel, geom, dst,
                        )
                        .map_err(device_err);
                    }
                }
            }
            Backend::Wgpu => {
                #[cfg(feature = "wgpu")]
                {
                    if super::wgpu::available() {
                        return super::wgpu::conv2d_direct(
                            src, weights, bias, shape, outputs, kernel, geom, dst,
                        )
                        .map_err(device_err);
                    }
                }
            }
            Backend::Cpu => {}
        }
    }

    match algo {
        ConvAlgorithm::Direct => {
            cpu::conv2d_direct(src, weights, bias, shape, outputs, kernel, geom, dst);
        }
        ConvAlgorithm::Im2col => {
            cpu::conv2d_im2col(
                src, weights, bias, shape, outputs, kernel, geom, workspace, dst,
            );
        }
    }
    Ok(())
}

/// Dispatches max pooling to the selected backend.
///
/// # Errors
///
/// [`EngineError::DeviceCompute`](crate::error::EngineError::DeviceCompute) when a launched GPU kernel fails.
pub fn max_pool(
    src: &[f32],
    shape: &TensorDesc,
    geom: &PoolGeometry,
    dst: &mut [f32],
) -> Result<()> {
    match get_backend() {
        Backend::Cuda => {
            #[cfg(feature = "cuda")]
            {
                if super::cuda::available() {
                    return super::cuda::max_pool(src, shape, geom, dst).map_err(device_err);
                }
            }
        }
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                if super::wgpu::available() {
                    return super::wgpu::max_pool(src, shape, geom, dst).map_err(device_err);
                }
            }
        }
        Backend::Cpu => {}
    }

    cpu::max_pool(src, shape, geom, dst);
    Ok(())
}

/// Dispatches the batched fully-connected forward to the selected backend.
///
/// # Errors
///
/// [`EngineError::DeviceCompute`](crate::error::EngineError::DeviceCompute) when a launched GPU kernel fails.
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
) -> Result<()> {
    match get_backend() {
        Backend::Cuda => {
            #[cfg(feature = "cuda")]
            {
                if super::cuda::available() {
                    return super::cuda::fully_connected(
                        src,
                        weights,
                        bias,
                        batch,
                        in_features,
                        out_features,
                        dtype,
                        dst,
                    )
                    .map_err(device_err);
                }
            }
        }
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                if super::wgpu::available() {
                    return super::wgpu::fully_connected(
                        src,
                        weights,
                        bias,
                        batch,
                        in_features,
                        out_features,
                        dtype,
                        dst,
                    )
                    .map_err(device_err);
                }
            }
        }
        Backend::Cpu => {}
    }

    cpu::fully_connected(src, weights, bias, batch, in_features, out_features, dtype, dst);
    Ok(())
}

/// Dispatches the rectified-linear activation to the selected backend.
///
/// # Errors
///
/// [`EngineError::DeviceCompute`](crate::error::EngineError::DeviceCompute) when a launched GPU kernel fails.
pub fn relu(src: &[f32], dst: &mut [f32]) -> Result<()> {
    match get_backend() {
        Backend::Cuda => {
            #[cfg(feature = "cuda")]
            {
                if super::cuda::available() {
                    return super::cuda::relu(src, dst).map_err(device_err);
                }
            }
        }
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                if super::wgpu::available() {
                    return super::wgpu::relu(src, dst).map_err(device_err);
                }
            }
        }
        Backend::Cpu => {}
    }

    cpu::relu(src, dst);
    Ok(())
}

/// Cross-channel LRN; CPU on every backend.
pub fn lrn(src: &[f32], shape: &TensorDesc, params: &LrnParams, dst: &mut [f32]) -> Result<()> {
    cpu::lrn_cross_channel(src, shape, params, dst);
    Ok(())
}

/// Channel softmax; CPU on every backend.
pub fn softmax(src: &[f32], shape: &TensorDesc, dst: &mut [f32]) -> Result<()> {
    cpu::softmax_channel(src, shape, dst);
    Ok(())
}
