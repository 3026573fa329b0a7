//! Loading and ownership of per-layer parameters.
//!
//! # Weight File Format
//!
//! Kernel weights and biases arrive as separate binary files of raw
//! little-endian `f32` values, flat row-major:
//!
//! - weights: exactly `inputs * outputs * kernel_dim²` values
//! - bias: exactly `outputs` values
//!
//! A byte-count mismatch is an I/O error at load time, not a silent partial
//! read, and it is detected against the file metadata *before* any device
//! buffer is reserved.
//!
//! # Ownership
//!
//! [`LayerParams`] exclusively owns the device buffers backing its weights
//! and bias; layer operators borrow them read-only. The host copies are
//! retained after upload so diagnostics and re-upload stay possible without
//! touching the filesystem again. [`LayerParams::release`] is idempotent,
//! and `Drop` releases everything on any exit path.

use crate::device::DeviceBuffer;
use crate::error::{EngineError, IoFailureKind, Result};
use briny::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Raw weight payload decoded from disk, pending validation.
struct RawWeights {
    expected: usize,
    data: Vec<f32>,
}

impl Validate for RawWeights {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.data.len() != self.expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Parameters of one learned layer: geometry plus owned weight/bias buffers.
///
/// Constructed once at model-load time, immutable thereafter. For a
/// fully-connected layer `kernel_dim` is 1 and `inputs` counts the
/// flattened feature dimension.
#[derive(Debug)]
pub struct LayerParams {
    /// Input channels (or flattened input features).
    pub inputs: usize,
    /// Output channels (or output features).
    pub outputs: usize,
    /// Linear kernel dimension; the kernel is `kernel_dim * kernel_dim`.
    pub kernel_dim: usize,
    weights_h: Vec<f32>,
    bias_h: Vec<f32>,
    weights_d: DeviceBuffer,
    bias_d: DeviceBuffer,
}

impl LayerParams {
    /// Loads weights and bias from disk and uploads both to device buffers.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Io`] if either path is unreadable or its byte count
    ///   does not match the layer geometry.
    /// - [`EngineError::Allocation`] if a device buffer cannot be reserved.
    pub fn load(
        inputs: usize,
        outputs: usize,
        kernel_dim: usize,
        weights_path: &Path,
        bias_path: &Path,
    ) -> Result<Self> {
        let weights_h = read_floats(weights_path, inputs * outputs * kernel_dim * kernel_dim)?;
        let bias_h = read_floats(bias_path, outputs)?;
        Self::from_host(inputs, outputs, kernel_dim, weights_h, bias_h)
    }

    /// Builds parameters from host values already in memory.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ShapeMismatch`] if the value counts do not match the
    ///   layer geometry.
    /// - [`EngineError::Allocation`] if a device buffer cannot be reserved.
    pub fn from_host(
        inputs: usize,
        outputs: usize,
        kernel_dim: usize,
        weights_h: Vec<f32>,
        bias_h: Vec<f32>,
    ) -> Result<Self> {
        if weights_h.len() != inputs * outputs * kernel_dim * kernel_dim {
            return Err(EngineError::shape(
                "weights",
                format!(
                    "{} weight values for geometry {inputs}x{outputs}x{kernel_dim}x{kernel_dim}",
                    weights_h.len()
                ),
            ));
        }
        if bias_h.len() != outputs {
            return Err(EngineError::shape(
                "weights",
                format!("{} bias values for {outputs} outputs", bias_h.len()),
            ));
        }

        let mut weights_d = DeviceBuffer::new();
        weights_d.upload(&weights_h)?;
        let mut bias_d = DeviceBuffer::new();
        bias_d.upload(&bias_h)?;

        Ok(Self {
            inputs,
            outputs,
            kernel_dim,
            weights_h,
            bias_h,
            weights_d,
            bias_d,
        })
    }

    /// Device-resident kernel weights, row-major
    /// `[outputs, inputs, kernel_dim, kernel_dim]`.
    #[must_use]
    pub fn weights(&self) -> &DeviceBuffer {
        &self.weights_d
    }

    /// Device-resident bias, one value per output channel.
    #[must_use]
    pub fn bias(&self) -> &DeviceBuffer {
        &self.bias_d
    }

    /// Host copy of the weights, retained for diagnostics.
    #[must_use]
    pub fn weights_host(&self) -> &[f32] {
        &self.weights_h
    }

    /// Host copy of the bias, retained for diagnostics.
    #[must_use]
    pub fn bias_host(&self) -> &[f32] {
        &self.bias_h
    }

    /// Re-uploads the retained host copies into the device buffers.
    ///
    /// # Errors
    ///
    /// [`EngineError::Allocation`] if a device buffer cannot be reserved.
    pub fn reupload(&mut self) -> Result<()> {
        self.weights_d.upload(&self.weights_h)?;
        self.bias_d.upload(&self.bias_h)
    }

    /// Frees host and device buffers. Safe to call more than once; `Drop`
    /// performs the same release on any exit path.
    pub fn release(&mut self) {
        self.weights_h = Vec::new();
        self.bias_h = Vec::new();
        self.weights_d.free();
        self.bias_d.free();
    }
}

/// Reads exactly `expected` little-endian `f32` values from `path`.
///
/// The byte count is checked against the file metadata before anything is
/// read or allocated, so a malformed file never reaches a device buffer.
fn read_floats(path: &Path, expected: usize) -> Result<Vec<f32>> {
    let io_err = |kind| EngineError::Io {
        path: PathBuf::from(path),
        kind,
    };

    let file = File::open(path).map_err(|e| io_err(IoFailureKind::Read(e)))?;
    let meta = file
        .metadata()
        .map_err(|e| io_err(IoFailureKind::Read(e)))?;
    let expected_bytes = (expected * size_of::<f32>()) as u64;
    if meta.len() != expected_bytes {
        return Err(io_err(IoFailureKind::SizeMismatch {
            expected: expected_bytes,
            actual: meta.len(),
        }));
    }

    let mut reader = BufReader::new(file);
    let mut buf4 = [0u8; 4];
    let mut data = Vec::with_capacity(expected);
    for _ in 0..expected {
        reader
            .read_exact(&mut buf4)
            .map_err(|e| io_err(IoFailureKind::Read(e)))?;
        data.push(f32::from_le_bytes(buf4));
    }

    let raw = RawWeights { expected, data };
    let trusted =
        TrustedData::new(raw).map_err(|e| io_err(IoFailureKind::Validation(e)))?;
    Ok(trusted.into_inner().data)
}
