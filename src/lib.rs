//! forgenet: a forward-only convolutional network inference engine in Rust.
//!
//! Executes a CNN layer pipeline (convolution, pooling, fully-connected,
//! activation, local response normalization, softmax) over engine-owned
//! activation buffers and classifies an input image into a label index.
//!
//! # Features
//!
//! - NCHW shape propagation threaded through every layer call.
//! - Resize-in-place activation buffers with fallible allocation.
//! - Per-signature convolution algorithm selection with one-time benchmarking.
//! - Fused bias addition in convolution and fully-connected outputs.
//! - Optional half-precision storage path with 32-bit accumulation.
//!
//! # Goals
//!
//! - Inference only: no gradients, no parameter updates, no training loop.
//! - Recoverable errors up to the classification boundary; a bad image or a
//!   malformed weight file is a reported failure, not a process abort.
//! - Deterministic scores for identical weights and inputs on one engine.
//!
//! # Modules
//!
//! - [`tensor`] — Tensor shape descriptor and element precision.
//! - [`device`] — Device-style activation buffer management.
//! - [`weights`] — Loading and ownership of per-layer parameters.
//! - [`ops`] — Forward kernels and backend dispatch.
//! - [`algo`] — Convolution algorithm selection and caching.
//! - [`network`] — Layer pipeline and classification driver.
//! - [`backend`] — Compute backend selection.
//! - [`error`] — Error kinds and the crate [`Result`](error::Result) alias.
//!
//! # Example
//!
//! ```rust
//! use forgenet::network::{Layer, Network};
//! use forgenet::tensor::TensorDesc;
//! use forgenet::weights::LayerParams;
//!
//! let fc = LayerParams::from_host(4, 3, 1, vec![0.0; 12], vec![1.0, 0.0, 0.0]).unwrap();
//! let mut net = Network::new(vec![
//!     Layer::FullyConnected { params: fc },
//!     Layer::Softmax,
//! ]);
//! let result = net.classify(&[0.0; 4], TensorDesc::new(1, 1, 2, 2)).unwrap();
//! assert_eq!(result.label, 0);
//! ```

pub mod algo;
pub mod backend;
pub mod device;
pub mod error;
pub mod network;
pub mod ops;
pub mod tensor;
pub mod weights;
