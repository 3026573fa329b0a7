//! Error kinds and the crate-wide `Result` alias.
//!
//! Every fallible path in the engine reports one of four failure classes:
//!
//! - [`EngineError::Io`] — a weight or bias file is unreadable, or its byte
//!   count does not match the layer geometry.
//! - [`EngineError::Allocation`] — an activation or workspace buffer could
//!   not be reserved. Fatal by policy for the engine instance; callers must
//!   not continue with a stale buffer.
//! - [`EngineError::DeviceCompute`] — a backend kernel reported failure.
//! - [`EngineError::ShapeMismatch`] — an operator received a tensor shape
//!   incompatible with its configured parameters.
//!
//! Errors propagate as values up to the classification boundary; a bad input
//! aborts that forward pass and nothing else.

use briny::prelude::ValidationError;
use std::fmt;
use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, EngineError>;

/// How an I/O failure came about while loading weights.
#[derive(Debug)]
pub enum IoFailureKind {
    /// The underlying read failed.
    Read(std::io::Error),
    /// The file length does not match the layer geometry.
    SizeMismatch {
        /// Bytes the geometry requires.
        expected: u64,
        /// Bytes actually present on disk.
        actual: u64,
    },
    /// The decoded payload failed validation.
    Validation(ValidationError),
}

impl fmt::Display for IoFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoFailureKind::Read(e) => write!(f, "read error: {e}"),
            IoFailureKind::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, found {actual}")
            }
            IoFailureKind::Validation(e) => write!(f, "validation error: {e}"),
        }
    }
}

/// Engine failure classes.
#[derive(Debug)]
pub enum EngineError {
    /// A weight/bias source could not be read or has the wrong length.
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// What went wrong with it.
        kind: IoFailureKind,
    },
    /// Buffer memory could not be reserved.
    Allocation {
        /// Size of the failed reservation in bytes.
        requested: usize,
    },
    /// A backend kernel reported failure.
    DeviceCompute(String),
    /// An operator received a shape incompatible with its parameters.
    ShapeMismatch {
        /// The operator that rejected the shape.
        op: &'static str,
        /// Human-readable description of the mismatch.
        detail: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { path, kind } => {
                write!(f, "I/O failure for {}: {kind}", path.display())
            }
            EngineError::Allocation { requested } => {
                write!(f, "allocation failure: {requested} bytes")
            }
            EngineError::DeviceCompute(msg) => write!(f, "device compute failure: {msg}"),
            EngineError::ShapeMismatch { op, detail } => {
                write!(f, "shape mismatch in {op}: {detail}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io {
                kind: IoFailureKind::Read(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}

impl EngineError {
    /// Shorthand for a [`EngineError::ShapeMismatch`].
    pub fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        EngineError::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }
}
