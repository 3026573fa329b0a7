//! # Forward Operator Layer
//!
//! This module defines and dispatches the forward kernels of the engine
//! across different compute backends, including CPU and GPU (WGPU).
//!
//! ## Submodules
//!
//! - [`cpu`] — Multi-threaded + SIMD CPU kernels (default fallback backend)
//! - [`wgpu`] *(opt-in)* — GPU compute shader pipelines using `wgpu`
//! - [`cuda`] *(planned)* — CUDA GPU backend for NVIDIA (not yet supported)
//! - [`dispatch`] — Dynamic backend switching and unified operator interfaces
//!
//! ## Operator Shape
//!
//! Every operator is stateless per call: it reads the incoming
//! [`TensorDesc`](crate::tensor::TensorDesc), computes into a destination
//! slice sized by the caller, and the caller rewrites the descriptor with
//! the output shape. The pipeline is strictly sequential, so no kernel ever
//! sees a buffer another operator is still producing.
//!
//! ## Backend Selection
//!
//! Dispatching is handled internally based on compile-time features and the
//! runtime [`Backend`](crate::backend::Backend) flag; a GPU kernel that is
//! unavailable or fails to launch falls back to the CPU implementation.
//!
//! ## Precision
//!
//! Kernels honor the descriptor's [`DType`](crate::tensor::DType):
//! under `F16`, convolution and fully-connected operands are rounded through
//! half-precision storage while all accumulation remains in `f32`.

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod dispatch;
#[cfg(any(feature = "wgpu", feature = "cuda"))]
pub mod wgpu;

/// Convolution geometry of one layer.
///
/// The reference configuration is zero padding, unit stride, unit dilation,
/// which yields `out = in - kernel + 1` spatially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    /// Zero padding applied to both spatial edges.
    pub pad: usize,
    /// Filter stride.
    pub stride: usize,
    /// Filter dilation.
    pub dilation: usize,
}

impl Default for ConvGeometry {
    fn default() -> Self {
        Self {
            pad: 0,
            stride: 1,
            dilation: 1,
        }
    }
}

impl ConvGeometry {
    /// Output extent along one spatial dimension, or `None` when the kernel
    /// does not fit the padded input.
    #[must_use]
    pub fn out_dim(&self, in_dim: usize, kernel: usize) -> Option<usize> {
        let effective = self.dilation * (kernel - 1) + 1;
        let padded = in_dim + 2 * self.pad;
        if kernel == 0 || self.stride == 0 || padded < effective {
            return None;
        }
        Some((padded - effective) / self.stride + 1)
    }
}

/// Pooling geometry of one layer.
///
/// The reference configuration is a 2×2 window with stride 2 and no
/// padding, halving each spatial dimension (floor division).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGeometry {
    /// Square window extent.
    pub window: usize,
    /// Window stride.
    pub stride: usize,
}

impl Default for PoolGeometry {
    fn default() -> Self {
        Self { window: 2, stride: 2 }
    }
}

impl PoolGeometry {
    /// Output extent along one spatial dimension, or `None` when the window
    /// does not fit the input.
    #[must_use]
    pub fn out_dim(&self, in_dim: usize) -> Option<usize> {
        if self.window == 0 || self.stride == 0 || in_dim < self.window {
            return None;
        }
        Some((in_dim - self.window) / self.stride + 1)
    }
}

/// Local response normalization parameters.
///
/// Cross-channel normalization following the Caffe convention, with `alpha`
/// divided by the window size:
/// `dst = src / (k + alpha/n * sum(src^2))^beta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrnParams {
    /// Cross-channel window size.
    pub n: usize,
    /// Sum scale.
    pub alpha: f32,
    /// Exponent.
    pub beta: f32,
    /// Additive bias inside the power term.
    pub k: f32,
}

impl Default for LrnParams {
    fn default() -> Self {
        Self {
            n: 5,
            alpha: 1e-4,
            beta: 0.75,
            k: 1.0,
        }
    }
}
