//! Tensor shape descriptor and element precision.
//!
//! Activations in this engine are flat NCHW buffers owned by
//! [`crate::device::DeviceBuffer`]; the shape travels separately as a
//! [`TensorDesc`] that every layer operator takes by mutable reference,
//! reads to configure itself, and overwrites with its output shape before
//! returning. Convolution and pooling change `(c, h, w)`; activation, LRN
//! and softmax preserve the shape; fully-connected collapses `(c, h, w)`
//! to `(outputs, 1, 1)`.

use crate::error::{EngineError, Result};
use half::f16;

/// Element precision of a forward pass.
///
/// The precision is homogeneous across a pass. `F16` is a storage
/// precision: convolution and fully-connected operands are rounded through
/// half floats while every accumulation stays in `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    /// 32-bit floats end to end (default).
    #[default]
    F32,
    /// Half-precision operand storage, 32-bit accumulation.
    F16,
}

impl DType {
    /// Storage size of one element in bytes.
    #[must_use]
    pub fn size_of(self) -> usize {
        match self {
            DType::F32 => size_of::<f32>(),
            DType::F16 => size_of::<f16>(),
        }
    }

    /// Rounds a value through this precision's storage format.
    #[inline]
    #[must_use]
    pub fn quantize(self, x: f32) -> f32 {
        match self {
            DType::F32 => x,
            DType::F16 => f16::from_f32(x).to_f32(),
        }
    }
}

/// Shape of a 4-dimensional NCHW tensor plus its element precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    /// Batch size.
    pub n: usize,
    /// Channels.
    pub c: usize,
    /// Height.
    pub h: usize,
    /// Width.
    pub w: usize,
    /// Element precision.
    pub dtype: DType,
}

impl TensorDesc {
    /// Creates a descriptor with the default (`F32`) precision.
    #[must_use]
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self {
            n,
            c,
            h,
            w,
            dtype: DType::F32,
        }
    }

    /// Sets the element precision, consuming and returning the descriptor.
    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Number of elements described.
    #[must_use]
    pub fn elem_count(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    /// Storage size in bytes at this precision.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.elem_count() * self.dtype.size_of()
    }

    /// Rewrites the dimensions in place, preserving precision.
    pub fn set_dims(&mut self, n: usize, c: usize, h: usize, w: usize) {
        self.n = n;
        self.c = c;
        self.h = h;
        self.w = w;
    }

    /// Checks the operator-input invariant: all four dimensions positive.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShapeMismatch`] naming the operator that
    /// received the degenerate shape.
    pub fn validate(&self, op: &'static str) -> Result<()> {
        if self.n == 0 || self.c == 0 || self.h == 0 || self.w == 0 {
            return Err(EngineError::shape(
                op,
                format!(
                    "all dimensions must be positive, got {}x{}x{}x{}",
                    self.n, self.c, self.h, self.w
                ),
            ));
        }
        Ok(())
    }
}
