//! Device-style activation buffer management.
//!
//! Intermediate activations live in [`DeviceBuffer`]s owned by the engine
//! instance that allocated them; layer operators borrow them per call and
//! never share them across instances. The single buffer strategy is
//! resize-in-place: when the required size changes, the previous allocation
//! is released before the new one is made, and an exhausted reservation is
//! reported as [`EngineError::Allocation`] rather than reusing an undersized
//! buffer. Release is guaranteed on every exit path by `Drop`.
//!
//! Convolution workspaces use the same type, constructed for one call and
//! dropped immediately after it.

use crate::error::{EngineError, Result};

/// A contiguous, engine-owned buffer of `f32` activation elements.
///
/// Starts empty; allocated lazily on first [`resize`](DeviceBuffer::resize).
#[derive(Debug, Default)]
pub struct DeviceBuffer {
    data: Vec<f32>,
}

impl DeviceBuffer {
    /// Creates an empty buffer with no backing allocation.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Resizes the buffer to hold exactly `elems` elements.
    ///
    /// A no-op when the size already matches. Otherwise the previous
    /// allocation is released first, then `elems` zeroed elements are
    /// reserved.
    ///
    /// # Errors
    ///
    /// [`EngineError::Allocation`] when the reservation fails. The buffer is
    /// left empty in that case; callers must not continue the pass.
    pub fn resize(&mut self, elems: usize) -> Result<()> {
        if self.data.len() == elems {
            return Ok(());
        }
        // free first, then allocate
        self.data = Vec::new();
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(elems)
            .map_err(|_| EngineError::Allocation {
                requested: elems * size_of::<f32>(),
            })?;
        fresh.resize(elems, 0.0);
        self.data = fresh;
        Ok(())
    }

    /// Resizes to fit `host` and copies it in.
    ///
    /// # Errors
    ///
    /// [`EngineError::Allocation`] when the reservation fails.
    pub fn upload(&mut self, host: &[f32]) -> Result<()> {
        self.resize(host.len())?;
        self.data.copy_from_slice(host);
        Ok(())
    }

    /// Copies the buffer contents back to host memory.
    #[must_use]
    pub fn download(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Releases the backing allocation. Idempotent.
    pub fn free(&mut self) {
        self.data = Vec::new();
    }

    /// Number of elements currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer currently holds no allocation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only view of the elements.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the elements.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}
