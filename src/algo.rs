//! Convolution algorithm selection and caching.
//!
//! Every convolution call needs an execution strategy before dispatch. The
//! [`AlgoSelector`] keeps a per-signature cache: the first call for a given
//! signature benchmarks every candidate on throwaway buffers, records each
//! candidate's time and workspace cost, and memoizes the fastest (ties
//! broken by lowest workspace). Subsequent calls with the same signature
//! reuse the cached choice for the lifetime of the engine, unless a caller
//! pins a choice or forces rediscovery.
//!
//! The signature covers the layer parameters *and* the current tensor
//! shape, so an algorithm tuned for one shape is never silently reused for
//! another.
//!
//! Benchmarking performs real kernel work, but only ever on buffers
//! constructed here; production activations are never touched.

use crate::error::{EngineError, Result};
use crate::ops::{ConvGeometry, dispatch};
use crate::tensor::{DType, TensorDesc};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Available convolution execution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvAlgorithm {
    /// Naive sliding-window cross-correlation; no workspace.
    Direct,
    /// Lowering to a matrix product; workspace holds the unrolled input.
    Im2col,
}

impl ConvAlgorithm {
    /// Every candidate, in benchmarking order.
    pub const ALL: [ConvAlgorithm; 2] = [ConvAlgorithm::Direct, ConvAlgorithm::Im2col];

    /// Short display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ConvAlgorithm::Direct => "direct",
            ConvAlgorithm::Im2col => "im2col",
        }
    }

    /// Scratch workspace the strategy needs for one call, in elements.
    #[must_use]
    pub fn workspace_elems(self, inputs: usize, kernel: usize, oh: usize, ow: usize) -> usize {
        match self {
            ConvAlgorithm::Direct => 0,
            ConvAlgorithm::Im2col => inputs * kernel * kernel * oh * ow,
        }
    }
}

/// Cache key: the convolving layer's parameters plus the incoming shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConvSignature {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    inputs: usize,
    outputs: usize,
    kernel_dim: usize,
    pad: usize,
    stride: usize,
    dilation: usize,
    dtype: DType,
}

impl ConvSignature {
    /// Builds the signature for one convolution call.
    #[must_use]
    pub fn new(
        shape: &TensorDesc,
        inputs: usize,
        outputs: usize,
        kernel_dim: usize,
        geom: &ConvGeometry,
    ) -> Self {
        Self {
            n: shape.n,
            c: shape.c,
            h: shape.h,
            w: shape.w,
            inputs,
            outputs,
            kernel_dim,
            pad: geom.pad,
            stride: geom.stride,
            dilation: geom.dilation,
            dtype: shape.dtype,
        }
    }
}

impl std::fmt::Display for ConvSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}-k{}o{}p{}s{}d{}",
            self.n,
            self.c,
            self.h,
            self.w,
            self.kernel_dim,
            self.outputs,
            self.pad,
            self.stride,
            self.dilation
        )
    }
}

/// The memoized outcome of one benchmarking round.
#[derive(Debug, Clone)]
pub struct AlgoChoice {
    /// Winning strategy.
    pub algorithm: ConvAlgorithm,
    /// Its measured time.
    pub elapsed: Duration,
    /// Its workspace cost in bytes.
    pub workspace_bytes: usize,
}

/// Benchmarks candidates and caches the choice per signature.
#[derive(Debug, Default)]
pub struct AlgoSelector {
    cache: HashMap<ConvSignature, AlgoChoice>,
}

impl AlgoSelector {
    /// Creates a selector with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the strategy for `sig`, benchmarking once per signature.
    ///
    /// # Errors
    ///
    /// Propagates allocation or kernel failures from the benchmark round.
    pub fn choose(&mut self, sig: &ConvSignature) -> Result<ConvAlgorithm> {
        if let Some(choice) = self.cache.get(sig) {
            return Ok(choice.algorithm);
        }

        let candidates = benchmark(sig)?;
        for c in &candidates {
            log::debug!(
                "candidate {} for {sig}: {:?} requiring {} workspace bytes",
                c.algorithm.name(),
                c.elapsed,
                c.workspace_bytes
            );
        }

        let winner = candidates
            .into_iter()
            .min_by(|a, b| {
                a.elapsed
                    .cmp(&b.elapsed)
                    .then(a.workspace_bytes.cmp(&b.workspace_bytes))
            })
            .ok_or_else(|| EngineError::shape("conv", "no convolution algorithm candidates"))?;

        log::info!("fastest algorithm {} for {sig}", winner.algorithm.name());
        let algorithm = winner.algorithm;
        self.cache.insert(sig.clone(), winner);
        Ok(algorithm)
    }

    /// The cached outcome for `sig`, if any.
    #[must_use]
    pub fn cached(&self, sig: &ConvSignature) -> Option<&AlgoChoice> {
        self.cache.get(sig)
    }

    /// Pins a strategy for `sig` without benchmarking.
    pub fn pin(&mut self, sig: ConvSignature, algorithm: ConvAlgorithm) {
        self.cache.insert(
            sig,
            AlgoChoice {
                algorithm,
                elapsed: Duration::ZERO,
                workspace_bytes: 0,
            },
        );
    }

    /// Drops the cached choice for `sig`, forcing rediscovery on next use.
    pub fn invalidate(&mut self, sig: &ConvSignature) -> Option<AlgoChoice> {
        self.cache.remove(sig)
    }

    /// Number of signatures currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing has been benchmarked or pinned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Times every candidate for `sig` on throwaway buffers.
fn benchmark(sig: &ConvSignature) -> Result<Vec<AlgoChoice>> {
    let shape = TensorDesc::new(sig.n, sig.c, sig.h, sig.w).with_dtype(sig.dtype);
    let geom = ConvGeometry {
        pad: sig.pad,
        stride: sig.stride,
        dilation: sig.dilation,
    };
    let oh = geom
        .out_dim(sig.h, sig.kernel_dim)
        .ok_or_else(|| EngineError::shape("conv", "kernel exceeds padded input height"))?;
    let ow = geom
        .out_dim(sig.w, sig.kernel_dim)
        .ok_or_else(|| EngineError::shape("conv", "kernel exceeds padded input width"))?;

    let src = vec![0.5f32; sig.n * sig.c * sig.h * sig.w];
    let weights = vec![0.5f32; sig.outputs * sig.inputs * sig.kernel_dim * sig.kernel_dim];
    let bias = vec![0.0f32; sig.outputs];
    let mut dst = vec![0.0f32; sig.n * sig.outputs * oh * ow];

    let mut results = Vec::with_capacity(ConvAlgorithm::ALL.len());
    for algo in ConvAlgorithm::ALL {
        let ws_elems = algo.workspace_elems(sig.inputs, sig.kernel_dim, oh, ow);
        let mut workspace = vec![0.0f32; ws_elems];

        // untimed first run primes allocators and shader caches
        dispatch::conv2d(
            algo, &src, &weights, &bias, &shape, sig.outputs, sig.kernel_dim, &geom,
            &mut workspace, &mut dst,
        )?;

        let start = Instant::now();
        dispatch::conv2d(
            algo, &src, &weights, &bias, &shape, sig.outputs, sig.kernel_dim, &geom,
            &mut workspace, &mut dst,
        )?;
        let elapsed = start.elapsed();

        results.push(AlgoChoice {
            algorithm: algo,
            elapsed,
            workspace_bytes: ws_elems * size_of::<f32>(),
        });
    }

    Ok(results)
}
