//! Layer pipeline and classification driver.
//!
//! A [`Network`] is a declarative list of [`Layer`] descriptors interpreted
//! by a small execution loop; changing the architecture is a data change,
//! not a code change. [`Network::lenet`] builds the reference topology:
//!
//! ```text
//! Input → Conv → Pool → Conv → Pool → FC → ReLU → LRN → FC → Softmax
//! ```
//!
//! Activations ping-pong between two engine-owned buffers that are resized
//! in place and reused call-to-call. The pipeline is strictly sequential
//! and blocking; one engine instance must not be shared across threads
//! without external serialization. Any operator failure aborts the
//! remaining chain — no partial result is ever returned.

use crate::algo::{AlgoSelector, ConvSignature};
use crate::device::DeviceBuffer;
use crate::error::{EngineError, Result};
use crate::ops::dispatch;
use crate::tensor::{DType, TensorDesc};
use crate::weights::LayerParams;

pub use crate::ops::{ConvGeometry, LrnParams, PoolGeometry};

/// One layer of the pipeline.
///
/// Learned layers own their [`LayerParams`]; the rest carry only geometry.
#[derive(Debug)]
pub enum Layer {
    /// Cross-correlation with fused bias.
    Conv {
        /// Kernel weights and bias.
        params: LayerParams,
        /// Padding, stride and dilation.
        geometry: ConvGeometry,
    },
    /// Windowed max pooling.
    Pool(PoolGeometry),
    /// Batched `W·x + b` over the flattened features.
    FullyConnected {
        /// Weight matrix and bias.
        params: LayerParams,
    },
    /// Rectified-linear activation.
    Activation,
    /// Cross-channel local response normalization.
    Lrn(LrnParams),
    /// Channel softmax.
    Softmax,
}

/// The outcome of classifying one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Index of the winning label (argmax, lowest index on ties).
    pub label: usize,
    /// Per-label scores; sums to 1 within floating-point tolerance.
    pub scores: Vec<f32>,
}

/// A forward-only inference engine over a fixed layer list.
#[derive(Debug)]
pub struct Network {
    layers: Vec<Layer>,
    selector: AlgoSelector,
    src: DeviceBuffer,
    dst: DeviceBuffer,
    dtype: DType,
}

impl Network {
    /// Builds an engine over `layers` at full (`F32`) precision.
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            layers,
            selector: AlgoSelector::new(),
            src: DeviceBuffer::new(),
            dst: DeviceBuffer::new(),
            dtype: DType::F32,
        }
    }

    /// Selects the element precision for every forward pass.
    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// The reference two-convolution digit classifier:
    /// `Conv → Pool → Conv → Pool → FC → ReLU → LRN → FC → Softmax`.
    #[must_use]
    pub fn lenet(
        conv1: LayerParams,
        conv2: LayerParams,
        ip1: LayerParams,
        ip2: LayerParams,
    ) -> Self {
        Self::new(vec![
            Layer::Conv {
                params: conv1,
                geometry: ConvGeometry::default(),
            },
            Layer::Pool(PoolGeometry::default()),
            Layer::Conv {
                params: conv2,
                geometry: ConvGeometry::default(),
            },
            Layer::Pool(PoolGeometry::default()),
            Layer::FullyConnected { params: ip1 },
            Layer::Activation,
            Layer::Lrn(LrnParams::default()),
            Layer::FullyConnected { params: ip2 },
            Layer::Softmax,
        ])
    }

    /// The layer list, in execution order.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Read access to the algorithm selector and its cache.
    #[must_use]
    pub fn selector(&self) -> &AlgoSelector {
        &self.selector
    }

    /// Mutable access to the algorithm selector, for pinning a strategy or
    /// forcing rediscovery.
    pub fn selector_mut(&mut self) -> &mut AlgoSelector {
        &mut self.selector
    }

    /// Runs the full pipeline over `input` described by `shape`.
    ///
    /// Returns the output shape and the downloaded output activations. The
    /// descriptor's precision is overridden by the engine's configured
    /// [`DType`].
    ///
    /// # Errors
    ///
    /// Fail-fast: the first operator error aborts the chain. Shape
    /// problems are [`EngineError::ShapeMismatch`], exhausted buffers
    /// [`EngineError::Allocation`], kernel failures
    /// [`EngineError::DeviceCompute`].
    pub fn forward(&mut self, input: &[f32], mut shape: TensorDesc) -> Result<(TensorDesc, Vec<f32>)> {
        shape.dtype = self.dtype;
        shape.validate("input")?;
        if input.len() != shape.elem_count() {
            return Err(EngineError::shape(
                "input",
                format!(
                    "{} elements for shape {}x{}x{}x{}",
                    input.len(),
                    shape.n,
                    shape.c,
                    shape.h,
                    shape.w
                ),
            ));
        }

        self.src.upload(input)?;
        let Self {
            layers,
            selector,
            src,
            dst,
            ..
        } = self;

        for layer in layers.iter() {
            match layer {
                Layer::Conv { params, geometry } => {
                    conv_forward(selector, &mut shape, params, geometry, src, dst)?;
                }
                Layer::Pool(geometry) => pool_forward(&mut shape, geometry, src, dst)?,
                Layer::FullyConnected { params } => fc_forward(&mut shape, params, src, dst)?,
                Layer::Activation => activation_forward(&shape, src, dst)?,
                Layer::Lrn(params) => lrn_forward(&shape, params, src, dst)?,
                Layer::Softmax => softmax_forward(&shape, src, dst)?,
            }
            core::mem::swap(src, dst);
        }

        Ok((shape, self.src.download()))
    }

    /// Classifies a single sample; the terminal layer's scores are reduced
    /// by argmax with ties going to the lowest index.
    ///
    /// # Errors
    ///
    /// [`EngineError::ShapeMismatch`] when `shape.n != 1`; otherwise as
    /// [`Network::forward`].
    pub fn classify(&mut self, input: &[f32], shape: TensorDesc) -> Result<Classification> {
        if shape.n != 1 {
            return Err(EngineError::shape(
                "classify",
                format!("single-image entry requires batch size 1, got {}", shape.n),
            ));
        }
        let (_, scores) = self.forward(input, shape)?;
        Ok(Classification {
            label: argmax(&scores),
            scores,
        })
    }

    /// Classifies a pre-batched buffer of `shape.n` samples independently.
    ///
    /// Accepts the output of an external batch region-extraction step in
    /// place of a single decoded image.
    ///
    /// # Errors
    ///
    /// As [`Network::forward`].
    pub fn classify_batch(&mut self, input: &[f32], shape: TensorDesc) -> Result<Vec<Classification>> {
        let (out_shape, scores) = self.forward(input, shape)?;
        let per_sample = out_shape.c * out_shape.h * out_shape.w;
        Ok(scores
            .chunks(per_sample)
            .map(|row| Classification {
                label: argmax(row),
                scores: row.to_vec(),
            })
            .collect())
    }
}

/// Left-to-right scan; the first maximum wins ties.
fn argmax(scores: &[f32]) -> usize {
    let mut id = 0;
    for i in 1..scores.len() {
        if scores[i] > scores[id] {
            id = i;
        }
    }
    id
}

fn conv_forward(
    selector: &mut AlgoSelector,
    shape: &mut TensorDesc,
    params: &LayerParams,
    geometry: &ConvGeometry,
    src: &DeviceBuffer,
    dst: &mut DeviceBuffer,
) -> Result<()> {
    shape.validate("conv")?;
    if shape.c != params.inputs {
        return Err(EngineError::shape(
            "conv",
            format!(
                "{} input channels for a layer expecting {}",
                shape.c, params.inputs
            ),
        ));
    }
    let oh = geometry
        .out_dim(shape.h, params.kernel_dim)
        .ok_or_else(|| EngineError::shape("conv", "kernel exceeds padded input height"))?;
    let ow = geometry
        .out_dim(shape.w, params.kernel_dim)
        .ok_or_else(|| EngineError::shape("conv", "kernel exceeds padded input width"))?;

    let sig = ConvSignature::new(shape, params.inputs, params.outputs, params.kernel_dim, geometry);
    let algo = selector.choose(&sig)?;

    dst.resize(shape.n * params.outputs * oh * ow)?;

    // workspace lives for exactly this call
    let mut workspace = DeviceBuffer::new();
    workspace.resize(algo.workspace_elems(params.inputs, params.kernel_dim, oh, ow))?;

    dispatch::conv2d(
        algo,
        src.as_slice(),
        params.weights().as_slice(),
        params.bias().as_slice(),
        shape,
        params.outputs,
        params.kernel_dim,
        geometry,
        workspace.as_mut_slice(),
        dst.as_mut_slice(),
    )?;

    shape.set_dims(shape.n, params.outputs, oh, ow);
    Ok(())
}

fn pool_forward(
    shape: &mut TensorDesc,
    geometry: &PoolGeometry,
    src: &DeviceBuffer,
    dst: &mut DeviceBuffer,
) -> Result<()> {
    shape.validate("pool")?;
    let oh = geometry
        .out_dim(shape.h)
        .ok_or_else(|| EngineError::shape("pool", "window exceeds input height"))?;
    let ow = geometry
        .out_dim(shape.w)
        .ok_or_else(|| EngineError::shape("pool", "window exceeds input width"))?;

    dst.resize(shape.n * shape.c * oh * ow)?;
    dispatch::max_pool(src.as_slice(), shape, geometry, dst.as_mut_slice())?;

    shape.set_dims(shape.n, shape.c, oh, ow);
    Ok(())
}

fn fc_forward(
    shape: &mut TensorDesc,
    params: &LayerParams,
    src: &DeviceBuffer,
    dst: &mut DeviceBuffer,
) -> Result<()> {
    shape.validate("fully_connected")?;
    let in_features = shape.c * shape.h * shape.w;
    if in_features != params.inputs {
        return Err(EngineError::shape(
            "fully_connected",
            format!(
                "{in_features} flattened features for a layer expecting {}",
                params.inputs
            ),
        ));
    }

    dst.resize(shape.n * params.outputs)?;
    dispatch::fully_connected(
        src.as_slice(),
        params.weights().as_slice(),
        params.bias().as_slice(),
        shape.n,
        in_features,
        params.outputs,
        shape.dtype,
        dst.as_mut_slice(),
    )?;

    shape.set_dims(shape.n, params.outputs, 1, 1);
    Ok(())
}

fn activation_forward(shape: &TensorDesc, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()> {
    shape.validate("activation")?;
    dst.resize(shape.elem_count())?;
    dispatch::relu(src.as_slice(), dst.as_mut_slice())
}

fn lrn_forward(
    shape: &TensorDesc,
    params: &LrnParams,
    src: &DeviceBuffer,
    dst: &mut DeviceBuffer,
) -> Result<()> {
    shape.validate("lrn")?;
    if params.n == 0 {
        return Err(EngineError::shape("lrn", "window size must be positive"));
    }
    dst.resize(shape.elem_count())?;
    dispatch::lrn(src.as_slice(), shape, params, dst.as_mut_slice())
}

fn softmax_forward(shape: &TensorDesc, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()> {
    shape.validate("softmax")?;
    dst.resize(shape.elem_count())?;
    dispatch::softmax(src.as_slice(), shape, dst.as_mut_slice())
}
