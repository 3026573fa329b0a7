//! Parallel CPU backend forward kernels
//!
//! # CPU Backend
//!
//! This module provides the CPU implementations of every forward operator
//! in the engine. These are the default when calling through
//! [`crate::ops::dispatch`]; they also serve as the fallback whenever a GPU
//! path is unavailable or declines a launch.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Optional SIMD acceleration using AVX2 (enabled via `simd` feature flag)
//! - Pure Rust fallback path when SIMD is disabled or unavailable
//!
//! ## Implemented Ops
//!
//! - `conv2d_direct` / `conv2d_im2col`: cross-correlation with fused bias
//! - `max_pool`: windowed max reduction
//! - `fully_connected`: batched `W·x + b` with fused bias
//! - `relu`: elementwise rectification, NaN-propagating
//! - `lrn_cross_channel`: cross-channel response normalization
//! - `softmax_channel`: numerically stable softmax over the channel axis
//!
//! ## Determinism
//!
//! Parallelism is always over independent output elements; every
//! accumulation runs sequentially within one element, so results are
//! bit-identical across runs for identical inputs.

use crate::ops::{ConvGeometry, LrnParams, PoolGeometry};
use crate::tensor::{DType, TensorDesc};
use rayon::prelude::*;
use std::borrow::Cow;

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
use core::arch::x86_64::*;

/// Rounds a whole slice through the storage precision.
///
/// Borrows unchanged under `F32`; materializes a rounded copy under `F16`.
fn quantized<'a>(data: &'a [f32], dtype: DType) -> Cow<'a, [f32]> {
    match dtype {
        DType::F32 => Cow::Borrowed(data),
        DType::F16 => Cow::Owned(data.iter().map(|&x| dtype.quantize(x)).collect()),
    }
}

/// Performs a matrix multiplication `C = A × B` (`A: m×k`, `B: k×n`) into
/// `out`, which must hold `m * n` elements.
///
/// # Optimizations
///
/// - Uses `rayon` for parallel row computation
/// - Uses AVX2 SIMD for fused multiply-adds (if enabled via `--features=simd`)
pub fn gemm(a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(out.len(), m * n);

    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for j in 0..n {
            let sum = {
                #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
                {
                    let mut acc = unsafe { _mm256_setzero_ps() };
                    let mut idx = 0;
                    while idx + 8 <= k {
                        unsafe {
                            let a_chunk = _mm256_loadu_ps(&a[i * k + idx]);
                            let b_chunk = _mm256_set_ps(
                                b[(idx + 7) * n + j],
                                b[(idx + 6) * n + j],
                                b[(idx + 5) * n + j],
                                b[(idx + 4) * n + j],
                                b[(idx + 3) * n + j],
                                b[(idx + 2) * n + j],
                                b[(idx + 1) * n + j],
                                b[idx * n + j],
                            );
                            acc = _mm256_fmadd_ps(a_chunk, b_chunk, acc);
                        }
                        idx += 8;
                    }

                    let mut temp = [0.0f32; 8];
                    unsafe { _mm256_storeu_ps(temp.as_mut_ptr(), acc) };
                    let mut sum: f32 = temp.iter().sum();

                    for l in idx..k {
                        sum += a[i * k + l] * b[l * n + j];
                    }

                    sum
                }

                #[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
                {
                    let mut sum = 0.0f32;
                    for l in 0..k {
                        sum += a[i * k + l] * b[l * n + j];
                    }
                    sum
                }
            };
            row[j] = sum;
        }
    });
}

/// Direct cross-correlation with fused bias.
///
/// `src` is NCHW per `shape`; `weights` is `[outputs, shape.c, kernel,
/// kernel]` row-major; `dst` must hold `shape.n * outputs * oh * ow`
/// elements where `oh`/`ow` follow from `geom`. Out-of-bounds taps read as
/// zero (zero padding).
pub fn conv2d_direct(
    src: &[f32],
    weights: &[f32],
    bias: &[f32],
    shape: &TensorDesc,
    outputs: usize,
    kernel: usize,
    geom: &ConvGeometry,
    dst: &mut [f32],
) {
    let (c, h, w) = (shape.c, shape.h, shape.w);
    let oh = geom.out_dim(h, kernel).unwrap_or(0);
    let ow = geom.out_dim(w, kernel).unwrap_or(0);
    debug_assert_eq!(dst.len(), shape.n * outputs * oh * ow);

    let dtype = shape.dtype;
    let src = quantized(src, dtype);
    let weights = quantized(weights, dtype);
    let src = &*src;
    let weights = &*weights;

    dst.par_chunks_mut(ow).enumerate().for_each(|(row_idx, row)| {
        let ni = row_idx / (outputs * oh);
        let rem = row_idx % (outputs * oh);
        let oc = rem / oh;
        let oy = rem % oh;
        let b = dtype.quantize(bias[oc]);

        for (ox, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for ic in 0..c {
                for ky in 0..kernel {
                    let iy = oy * geom.stride + ky * geom.dilation;
                    if iy < geom.pad || iy - geom.pad >= h {
                        continue;
                    }
                    let iy = iy - geom.pad;
                    for kx in 0..kernel {
                        let ix = ox * geom.stride + kx * geom.dilation;
                        if ix < geom.pad || ix - geom.pad >= w {
                            continue;
                        }
                        let ix = ix - geom.pad;
                        acc += src[((ni * c + ic) * h + iy) * w + ix]
                            * weights[((oc * c + ic) * kernel + ky) * kernel + kx];
                    }
                }
            }
            *out = acc + b;
        }
    });
}

/// Cross-correlation lowered to a matrix product, with fused bias.
///
/// Unrolls each input window into a column of `workspace` (shaped
/// `[shape.c * kernel², oh * ow]` per sample), multiplies by the filter
/// matrix `[outputs, shape.c * kernel²]`, then adds the bias. `workspace`
/// is caller-provided scratch sized by the algorithm selector and is not
/// read after the call.
pub fn conv2d_im2col(
    src: &[f32],
    weights: &[f32],
    bias: &[f32],
    shape: &TensorDesc,
    outputs: usize,
    kernel: usize,
    geom: &ConvGeometry,
    workspace: &mut [f32],
    dst: &mut [f32],
) {
    let (c, h, w) = (shape.c, shape.h, shape.w);
    let oh = geom.out_dim(h, kernel).unwrap_or(0);
    let ow = geom.out_dim(w, kernel).unwrap_or(0);
    let patch = c * kernel * kernel;
    let cols = oh * ow;
    debug_assert_eq!(dst.len(), shape.n * outputs * cols);
    debug_assert!(workspace.len() >= patch * cols);

    let dtype = shape.dtype;
    let weights = quantized(weights, dtype);

    for ni in 0..shape.n {
        let sample = &src[ni * c * h * w..(ni + 1) * c * h * w];

        // column layout keeps the GEMM inner loop contiguous over taps
        workspace[..patch * cols]
            .par_chunks_mut(cols)
            .enumerate()
            .for_each(|(p, row)| {
                let ic = p / (kernel * kernel);
                let ky = (p / kernel) % kernel;
                let kx = p % kernel;
                for oy in 0..oh {
                    for ox in 0..ow {
                        let iy = oy * geom.stride + ky * geom.dilation;
                        let ix = ox * geom.stride + kx * geom.dilation;
                        let v = if iy < geom.pad
                            || ix < geom.pad
                            || iy - geom.pad >= h
                            || ix - geom.pad >= w
                        {
                            0.0
                        } else {
                            sample[(ic * h + iy - geom.pad) * w + ix - geom.pad]
                        };
                        row[oy * ow + ox] = dtype.quantize(v);
                    }
                }
            });

        let out = &mut dst[ni * outputs * cols..(ni + 1) * outputs * cols];
        gemm(&weights, &workspace[..patch * cols], outputs, patch, cols, out);

        out.par_chunks_mut(cols).enumerate().for_each(|(oc, row)| {
            let b = dtype.quantize(bias[oc]);
            for v in row.iter_mut() {
                *v += b;
            }
        });
    }
}

/// Windowed max pooling.
///
/// Ties go to the first value encountered in the left-to-right window scan;
/// a NaN anywhere in the window propagates to the output.
pub fn max_pool(src: &[f32], shape: &TensorDesc, geom: &PoolGeometry, dst: &mut [f32]) {
    let (c, h, w) = (shape.c, shape.h, shape.w);
    let oh = geom.out_dim(h).unwrap_or(0);
    let ow = geom.out_dim(w).unwrap_or(0);
    debug_assert_eq!(dst.len(), shape.n * c * oh * ow);

    dst.par_chunks_mut(ow).enumerate().for_each(|(row_idx, row)| {
        let plane = row_idx / oh;
        let oy = row_idx % oh;
        let base = plane * h * w;

        for (ox, out) in row.iter_mut().enumerate() {
            let mut best = f32::NEG_INFINITY;
            for ky in 0..geom.window {
                let iy = oy * geom.stride + ky;
                for kx in 0..geom.window {
                    let ix = ox * geom.stride + kx;
                    let v = src[base + iy * w + ix];
                    if v.is_nan() {
                        best = f32::NAN;
                    } else if !best.is_nan() && v > best {
                        best = v;
                    }
                }
            }
            *out = best;
        }
    });
}

/// Batched fully-connected forward: `dst = W·src + bias` per sample.
///
/// `weights` is row-major `[out_features, in_features]`; `src` holds
/// `batch * in_features` values and `dst` `batch * out_features`. Batch
/// size 1 is simply the degenerate case.
pub fn fully_connected(
    src: &[f32],
    weights: &[f32],
    bias: &[f32],
    batch: usize,
    in_features: usize,
    out_features: usize,
    dtype: DType,
    dst: &mut [f32],
) {
    debug_assert_eq!(src.len(), batch * in_features);
    debug_assert_eq!(weights.len(), out_features * in_features);
    debug_assert_eq!(dst.len(), batch * out_features);

    let src = quantized(src, dtype);
    let weights = quantized(weights, dtype);
    let src = &*src;
    let weights = &*weights;

    dst.par_iter_mut().enumerate().for_each(|(idx, out)| {
        let bi = idx / out_features;
        let o = idx % out_features;
        let x = &src[bi * in_features..(bi + 1) * in_features];
        let row = &weights[o * in_features..(o + 1) * in_features];
        let mut acc = dtype.quantize(bias[o]);
        for (xv, wv) in x.iter().zip(row) {
            acc += xv * wv;
        }
        *out = acc;
    });
}

/// Applies the rectified-linear activation element-wise.
///
/// NaN inputs propagate to the output rather than being clamped.
pub fn relu(src: &[f32], dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len());
    dst.par_iter_mut().zip(src.par_iter()).for_each(|(y, &x)| {
        *y = if x > 0.0 || x.is_nan() { x } else { 0.0 };
    });
}

/// Cross-channel local response normalization.
///
/// For each position, sums squares over a channel window of `params.n`
/// centered on the channel (clamped at the edges) and computes
/// `src / (k + alpha/n * sum)^beta`.
pub fn lrn_cross_channel(src: &[f32], shape: &TensorDesc, params: &LrnParams, dst: &mut [f32]) {
    let (c, h, w) = (shape.c, shape.h, shape.w);
    let spatial = h * w;
    let half = params.n / 2;
    let scale = params.alpha / params.n as f32;
    debug_assert_eq!(dst.len(), shape.n * c * spatial);

    dst.par_chunks_mut(c * spatial)
        .enumerate()
        .for_each(|(ni, sample)| {
            let base = ni * c * spatial;
            for ci in 0..c {
                let lo = ci.saturating_sub(half);
                let hi = (ci + half).min(c - 1);
                for s in 0..spatial {
                    let mut sum = 0.0f32;
                    for cj in lo..=hi {
                        let v = src[base + cj * spatial + s];
                        sum += v * v;
                    }
                    let denom = (params.k + scale * sum).powf(params.beta);
                    sample[ci * spatial + s] = src[base + ci * spatial + s] / denom;
                }
            }
        });
}

/// Numerically stable softmax over the channel axis, per `(n, h, w)`
/// position.
///
/// The running maximum is subtracted before exponentiation, so large
/// activations do not overflow; each output row sums to 1 within
/// floating-point tolerance.
pub fn softmax_channel(src: &[f32], shape: &TensorDesc, dst: &mut [f32]) {
    let (c, h, w) = (shape.c, shape.h, shape.w);
    let spatial = h * w;
    debug_assert_eq!(dst.len(), shape.n * c * spatial);

    dst.par_chunks_mut(c * spatial)
        .enumerate()
        .for_each(|(ni, sample)| {
            let base = ni * c * spatial;
            for s in 0..spatial {
                let max_val = (0..c)
                    .map(|ci| src[base + ci * spatial + s])
                    .fold(f32::NEG_INFINITY, f32::max);
                let exp_sum: f32 = (0..c)
                    .map(|ci| (src[base + ci * spatial + s] - max_val).exp())
                    .sum();
                for ci in 0..c {
                    sample[ci * spatial + s] =
                        (src[base + ci * spatial + s] - max_val).exp() / exp_sum;
                }
            }
        });
}
