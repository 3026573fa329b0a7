//! GPU-accelerated forward kernels using WGPU.
//!
//! This module implements the engine's inference kernels on the GPU using
//! WGPU + WGSL. It handles GPU context initialization, shader
//! precompilation (via `lazy_static`), and compute dispatch for:
//!
//! - `conv2d_direct` — direct cross-correlation with fused bias
//! - `fully_connected` — batched `W·x + b` with fused bias
//! - `relu` — NaN-propagating rectification
//! - `max_pool` — windowed max reduction
//!
//! All shaders are compiled and cached once at runtime. Activation data is
//! staged to the GPU per call and read back through a mapped staging
//! buffer, so the engine-owned buffers remain the single source of truth.
//!
//! A context that never initialized makes [`available`] return `false` and
//! the dispatch layer stays on the CPU; a kernel that launched and then
//! failed surfaces a [`GpuFailure`] instead.

use crate::ops::{ConvGeometry, PoolGeometry};
use crate::tensor::{DType, TensorDesc};
use briny::prelude::*;
use wgpu::util::DeviceExt;

const CONV2D: &str = include_str!("shaders/conv2d.wgsl");
const FC: &str = include_str!("shaders/fc.wgsl");
const RELU: &str = include_str!("shaders/relu.wgsl");
const MAXPOOL: &str = include_str!("shaders/maxpool.wgsl");

/// Basic wrapper for common GPU errors.
#[derive(Debug)]
pub enum GpuError {
    /// An error in requesting the adapter.
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the GPU (device).
    Device(wgpu::RequestDeviceError),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::Adapter(e) => write!(f, "Adapter error: {e}"),
            GpuError::Device(e) => write!(f, "Device error: {e}"),
        }
    }
}

/// Wrapper for a `GpuError` or `ValidationError` depending on how it fails.
#[derive(Debug)]
pub enum GpuFailureKind {
    /// An error resulting from the GPU.
    Gpu(GpuError),
    /// An error resulting from validating data.
    Validation(ValidationError),
}

impl std::fmt::Display for GpuFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuFailureKind::Gpu(err) => write!(f, "GPU error: {err}"),
            GpuFailureKind::Validation(err) => write!(f, "Validation error: {err}"),
        }
    }
}

/// A type of error closely related to the GPU.
#[derive(Debug)]
pub struct GpuFailure {
    /// The optional type of failure that occured.
    pub kind: Option<GpuFailureKind>,
    /// The optional message explaining the failure.
    pub message: Option<String>,
}

impl From<GpuError> for GpuFailure {
    fn from(kind: GpuError) -> Self {
        Self {
            kind: Some(GpuFailureKind::Gpu(kind)),
            message: None,
        }
    }
}

impl From<ValidationError> for GpuFailure {
    fn from(kind: ValidationError) -> Self {
        Self {
            kind: Some(GpuFailureKind::Validation(kind)),
            message: None,
        }
    }
}

impl From<&str> for GpuFailure {
    fn from(msg: &str) -> Self {
        Self {
            kind: None,
            message: Some(msg.to_string()),
        }
    }
}

impl From<String> for GpuFailure {
    fn from(msg: String) -> Self {
        Self {
            kind: None,
            message: Some(msg),
        }
    }
}

impl std::fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "GPU failure: {kind}")
        } else if let Some(msg) = &self.message {
            write!(f, "GPU failure: {msg}")
        } else {
            write!(f, "Unknown GPU failure")
        }
    }
}

impl std::error::Error for GpuFailure {}

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Initialized once globally and reused for all operations via
/// `lazy_static`. Provides the base hardware abstraction for launching
/// compute shaders.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for work submitted to the device.
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Initializes a new GPU context, selecting the default adapter and
    /// creating a device + queue.
    ///
    /// # Returns
    /// - `Ok(GpuContext)` if the GPU is successfully initialized
    /// - `Err(GpuError)` if adapter or device acquisition fails
    ///
    /// # Internals
    /// - Uses `pollster::block_on` to synchronously wait for async WGPU calls
    /// - Selects the default adapter with default options
    /// - Enables default limits and features for broad compatibility
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        Ok(Self { device, queue })
    }
}

/// Secure wrapper for WGSL source code extracted from files.
pub struct WgslSource<'a>(pub &'a str);

impl<'a> Validate for WgslSource<'a> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        // Basic sanity checks
        if src.len() > 65536 {
            return Err(ValidationError);
        }

        if !src.contains("fn main") {
            return Err(ValidationError);
        }

        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError); // Disallow source inclusion
        }

        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// Opens a WGSL shader and returns the validated, labeled contents.
pub fn load_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, GpuFailure> {
    WgslSource(source).validate()?; // briny-based check

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

/// A compiled compute pipeline plus the layout its bind group follows.
struct OpPipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn build_pipeline(
    ctx: &GpuContext,
    label: &str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Result<OpPipeline, GpuFailure> {
    let module = load_shader(&ctx.device, label, source)?;

    let layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });

    let pipeline_layout = ctx
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

    let pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

    Ok(OpPipeline { layout, pipeline })
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Result<GpuContext, GpuError> = GpuContext::new();
    static ref CONV2D_PIPELINE: Result<OpPipeline, GpuFailure> = context().and_then(|ctx| {
        build_pipeline(ctx, "conv2d", CONV2D, &[
            uniform_entry(0),
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, true),
            storage_entry(4, false),
        ])
    });
    static ref FC_PIPELINE: Result<OpPipeline, GpuFailure> = context().and_then(|ctx| {
        build_pipeline(ctx, "fc", FC, &[
            uniform_entry(0),
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, true),
            storage_entry(4, false),
        ])
    });
    static ref RELU_PIPELINE: Result<OpPipeline, GpuFailure> = context().and_then(|ctx| {
        build_pipeline(ctx, "relu", RELU, &[
            storage_entry(0, true),
            storage_entry(1, false),
        ])
    });
    static ref MAXPOOL_PIPELINE: Result<OpPipeline, GpuFailure> = context().and_then(|ctx| {
        build_pipeline(ctx, "maxpool", MAXPOOL, &[
            uniform_entry(0),
            storage_entry(1, true),
            storage_entry(2, false),
        ])
    });
}

/// Whether the GPU context initialized and kernels can be offered work.
pub fn available() -> bool {
    GPU_CONTEXT.is_ok()
}

fn context() -> Result<&'static GpuContext, GpuFailure> {
    GPU_CONTEXT
        .as_ref()
        .map_err(|e| GpuFailure::from(e.to_string()))
}

fn pipeline(
    cached: &'static Result<OpPipeline, GpuFailure>,
) -> Result<&'static OpPipeline, GpuFailure> {
    cached.as_ref().map_err(|e| GpuFailure::from(e.to_string()))
}

fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    let len = std::mem::size_of_val(data);
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, len) }
}

fn bytes_to_f32_slice(data: &[u8]) -> Result<&[f32], &'static str> {
    use std::mem::align_of;

    if data.as_ptr() as usize % align_of::<f32>() != 0 {
        return Err("unaligned buffer");
    }

    if data.len() % size_of::<f32>() != 0 {
        return Err("buffer length is not a multiple of f32");
    }

    let len = data.len() / size_of::<f32>();
    let float_ptr = data.as_ptr() as *const f32;
    unsafe { Ok(std::slice::from_raw_parts(float_ptr, len)) }
}

/// Launches one compute pass and reads the output back into `dst`.
///
/// Bindings are assigned in order: the uniform (when present), each input
/// storage buffer, then the output. One thread is dispatched per output
/// element.
fn run_kernel(
    op: &OpPipeline,
    label: &str,
    dims: Option<&[u32]>,
    inputs: &[&[f32]],
    dst: &mut [f32],
) -> Result<(), GpuFailure> {
    let ctx = context()?;
    let device = &ctx.device;
    let queue = &ctx.queue;
    let out_bytes = (dst.len() * size_of::<f32>()) as u64;

    let mut buffers = Vec::with_capacity(inputs.len() + 1);
    if let Some(dims) = dims {
        buffers.push(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dims"),
            contents: as_bytes(dims),
            usage: wgpu::BufferUsages::UNIFORM,
        }));
    }
    for input in inputs {
        buffers.push(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: as_bytes(input),
            usage: wgpu::BufferUsages::STORAGE,
        }));
    }

    let out_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: out_bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let mut entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, buf)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buf.as_entire_binding(),
        })
        .collect();
    entries.push(wgpu::BindGroupEntry {
        binding: buffers.len() as u32,
        resource: out_buffer.as_entire_binding(),
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &op.layout,
        entries: &entries,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(label),
    });

    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&op.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((dst.len() as u32).div_ceil(64), 1, 1);
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging"),
        size: out_bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    encoder.copy_buffer_to_buffer(&out_buffer, 0, &staging, 0, out_bytes);
    queue.submit(Some(encoder.finish()));

    staging.slice(..).map_async(wgpu::MapMode::Read, |_| {});
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|e| GpuFailure::from(e.to_string()))?;

    let view = staging.slice(..).get_mapped_range();
    dst.copy_from_slice(bytes_to_f32_slice(&view)?);
    drop(view);
    staging.unmap();

    Ok(())
}

/// Rounds operands through half storage on the host when the pass runs at
/// reduced precision; the shader accumulates in f32 either way.
fn staged(data: &[f32], dtype: DType) -> std::borrow::Cow<'_, [f32]> {
    match dtype {
        DType::F32 => std::borrow::Cow::Borrowed(data),
        DType::F16 => std::borrow::Cow::Owned(data.iter().map(|&x| dtype.quantize(x)).collect()),
    }
}

/// Direct cross-correlation with fused bias on the GPU.
///
/// # Errors
///
/// [`GpuFailure`] if the pipeline is unavailable or the pass fails.
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
    let op = pipeline(&CONV2D_PIPELINE)?;
    let oh = geom.out_dim(shape.h, kernel).ok_or("kernel exceeds input")?;
    let ow = geom.out_dim(shape.w, kernel).ok_or("kernel exceeds input")?;

    let dims = [
        shape.n as u32,
        shape.c as u32,
        shape.h as u32,
        shape.w as u32,
        outputs as u32,
        kernel as u32,
        oh as u32,
        ow as u32,
        geom.pad as u32,
        geom.stride as u32,
        geom.dilation as u32,
        dst.len() as u32,
    ];

    let src = staged(src, shape.dtype);
    let weights = staged(weights, shape.dtype);
    let bias = staged(bias, shape.dtype);
    run_kernel(op, "conv2d", Some(&dims), &[&src, &weights, &bias], dst)
}

/// Batched fully-connected forward with fused bias on the GPU.
///
/// # Errors
///
/// [`GpuFailure`] if the pipeline is unavailable or the pass fails.
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
    let op = pipeline(&FC_PIPELINE)?;

    let dims = [
        batch as u32,
        in_features as u32,
        out_features as u32,
        dst.len() as u32,
    ];

    let src = staged(src, dtype);
    let weights = staged(weights, dtype);
    let bias = staged(bias, dtype);
    run_kernel(op, "fc", Some(&dims), &[&src, &weights, &bias], dst)
}

/// NaN-propagating rectification on the GPU.
///
/// # Errors
///
/// [`GpuFailure`] if the pipeline is unavailable or the pass fails.
pub fn relu(src: &[f32], dst: &mut [f32]) -> Result<(), GpuFailure> {
    let op = pipeline(&RELU_PIPELINE)?;
    run_kernel(op, "relu", None, &[src], dst)
}

/// Windowed max pooling on the GPU.
///
/// # Errors
///
/// [`GpuFailure`] if the pipeline is unavailable or the pass fails.
pub fn max_pool(
    src: &[f32],
    shape: &TensorDesc,
    geom: &PoolGeometry,
    dst: &mut [f32],
) -> Result<(), GpuFailure> {
    let op = pipeline(&MAXPOOL_PIPELINE)?;
    let oh = geom.out_dim(shape.h).ok_or("window exceeds input")?;
    let ow = geom.out_dim(shape.w).ok_or("window exceeds input")?;

    let dims = [
        (shape.n * shape.c) as u32,
        shape.h as u32,
        shape.w as u32,
        oh as u32,
        ow as u32,
        geom.window as u32,
        geom.stride as u32,
        dst.len() as u32,
    ];

    run_kernel(op, "maxpool", Some(&dims), &[src], dst)
}
