//! Parallel CPU backend tensor operations.
//!
//! This module provides the CPU implementations of the differentiable
//! operations used by the classifier: dense and convolutional layers, the
//! activation menu, max pooling and the cross-entropy loss.
//!
//! These functions are the default when calling `ops::dispatch::xyz`; the
//! dispatcher falls through to this module whenever no accelerator kernel is
//! available for the selected backend.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon) along the
//!   sample axis
//! - Deterministic results given deterministic input (no atomics, no
//!   reduction reordering across threads)
//!
//! ## Conventions
//!
//! - Images are NCHW: `[samples, channels, height, width]`
//! - Dense inputs are `[samples, features]`
//! - Backward closures own cloned copies of whatever forward state they
//!   need, so they are `'static` and may be invoked after the inputs are
//!   gone

use rayon::prelude::*;

use crate::ops::dispatch::{AffineBack, LossBack, MatmulBack, UnaryBack};
use crate::tensors::{Ten64, Tensor};

/// Performs a matrix multiplication `C = A × B` on two 2D tensors (`A: m×k`,
/// `B: k×n`), returning the result tensor and a closure for backpropagation.
///
/// # Returns
/// - Output tensor of shape `[m, n]`
/// - Backward function mapping `dL/dC` to `(dL/dA, dL/dB)`
///
/// # Panics
/// - If either input is not rank 2, or the inner dimensions do not match.
pub fn matmul(a: &Ten64, b: &Ten64) -> (Ten64, Box<MatmulBack>) {
    assert_eq!(a.shape.len(), 2, "matmul expects rank-2 lhs");
    assert_eq!(b.shape.len(), 2, "matmul expects rank-2 rhs");
    let m = a.shape[0];
    let k = a.shape[1];
    let n = b.shape[1];
    assert_eq!(k, b.shape[0], "matmul shape mismatch");

    let a_data = &a.data;
    let b_data = &b.data;

    let mut out_data = vec![0.0; m * n];
    out_data.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for l in 0..k {
            let a_il = a_data[i * k + l];
            let b_row = &b_data[l * n..(l + 1) * n];
            for (o, &b_lj) in row.iter_mut().zip(b_row) {
                *o += a_il * b_lj;
            }
        }
    });

    let out = Tensor::new(vec![m, n], out_data);

    let a_val = a.data.clone();
    let b_val = b.data.clone();

    let back = move |grad: &Ten64| {
        assert_eq!(grad.shape, [m, n], "matmul backward shape mismatch");

        // dA = dC · Bᵀ
        let mut da = vec![0.0; m * k];
        da.par_chunks_mut(k).enumerate().for_each(|(i, row)| {
            for (l, o) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += grad.data[i * n + j] * b_val[l * n + j];
                }
                *o = sum;
            }
        });

        // dB = Aᵀ · dC
        let mut db = vec![0.0; k * n];
        for i in 0..m {
            for l in 0..k {
                let a_il = a_val[i * k + l];
                for j in 0..n {
                    db[l * n + j] += a_il * grad.data[i * n + j];
                }
            }
        }

        (Tensor::new(vec![m, k], da), Tensor::new(vec![k, n], db))
    };

    (out, Box::new(back))
}

/// Fully-connected layer: `y = x · w + b` with `x: [n, in]`, `w: [in, out]`
/// and `b: [out]` broadcast over rows.
///
/// # Returns
/// - Output tensor of shape `[n, out]`
/// - Backward function mapping `dL/dy` to `(dL/dx, dL/dw, dL/db)`
///
/// # Panics
/// - On any dimension mismatch between `x`, `w` and `b`.
pub fn linear(x: &Ten64, w: &Ten64, b: &Ten64) -> (Ten64, Box<AffineBack>) {
    assert_eq!(b.shape, [w.shape[1]], "linear bias shape mismatch");
    let (z, back_mm) = matmul(x, w);

    let cols = z.shape[1];
    let mut out = z;
    for row in out.data.chunks_mut(cols) {
        for (o, &bias) in row.iter_mut().zip(&b.data) {
            *o += bias;
        }
    }

    let back = move |grad: &Ten64| {
        let (dx, dw) = back_mm(grad);
        // bias gradient is the column sum of dL/dy
        let mut db = vec![0.0; cols];
        for row in grad.data.chunks(cols) {
            for (d, &g) in db.iter_mut().zip(row) {
                *d += g;
            }
        }
        (dx, dw, Tensor::new(vec![cols], db))
    };

    (out, Box::new(back))
}

/// 2-D convolution over NCHW input, stride 1, no padding ("valid").
///
/// `x: [n, c, h, w]`, `kernel: [oc, c, kh, kw]`, `bias: [oc]`.
///
/// # Returns
/// - Output tensor `[n, oc, h-kh+1, w-kw+1]`
/// - Backward function mapping `dL/dy` to `(dL/dx, dL/dkernel, dL/dbias)`
///
/// # Panics
/// - If input channels disagree with the kernel, or the kernel does not fit
///   inside the image.
pub fn conv2d(x: &Ten64, kernel: &Ten64, bias: &Ten64) -> (Ten64, Box<AffineBack>) {
    assert_eq!(x.shape.len(), 4, "conv2d expects NCHW input");
    assert_eq!(kernel.shape.len(), 4, "conv2d expects [oc, ic, kh, kw] kernel");
    let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let (oc, ic, kh, kw) = (
        kernel.shape[0],
        kernel.shape[1],
        kernel.shape[2],
        kernel.shape[3],
    );
    assert_eq!(c, ic, "conv2d channel mismatch");
    assert_eq!(bias.shape, [oc], "conv2d bias shape mismatch");
    assert!(kh <= h && kw <= w, "conv2d kernel larger than input");
    let oh = h - kh + 1;
    let ow = w - kw + 1;

    let x_data = &x.data;
    let k_data = &kernel.data;
    let b_data = &bias.data;

    let sample_in = c * h * w;
    let sample_out = oc * oh * ow;

    let mut out_data = vec![0.0; n * sample_out];
    out_data
        .par_chunks_mut(sample_out)
        .enumerate()
        .for_each(|(s, out_s)| {
            let x_s = &x_data[s * sample_in..(s + 1) * sample_in];
            for o in 0..oc {
                for y in 0..oh {
                    for xx in 0..ow {
                        let mut acc = b_data[o];
                        for ch in 0..c {
                            for i in 0..kh {
                                let x_row = &x_s[ch * h * w + (y + i) * w + xx..];
                                let k_row = &k_data[((o * c + ch) * kh + i) * kw..];
                                for j in 0..kw {
                                    acc += x_row[j] * k_row[j];
                                }
                            }
                        }
                        out_s[(o * oh + y) * ow + xx] = acc;
                    }
                }
            }
        });

    let out = Tensor::new(vec![n, oc, oh, ow], out_data);

    let x_val = x.data.clone();
    let k_val = kernel.data.clone();
    let x_shape = x.shape.clone();
    let k_shape = kernel.shape.clone();

    let back = move |grad: &Ten64| {
        assert_eq!(
            grad.shape,
            [n, oc, oh, ow],
            "conv2d backward shape mismatch"
        );
        let g = &grad.data;

        // input gradient, independent per sample
        let mut dx = vec![0.0; n * sample_in];
        dx.par_chunks_mut(sample_in)
            .enumerate()
            .for_each(|(s, dx_s)| {
                let g_s = &g[s * sample_out..(s + 1) * sample_out];
                for o in 0..oc {
                    for y in 0..oh {
                        for xx in 0..ow {
                            let gv = g_s[(o * oh + y) * ow + xx];
                            if gv == 0.0 {
                                continue;
                            }
                            for ch in 0..c {
                                for i in 0..kh {
                                    for j in 0..kw {
                                        dx_s[ch * h * w + (y + i) * w + (xx + j)] +=
                                            gv * k_val[((o * c + ch) * kh + i) * kw + j];
                                    }
                                }
                            }
                        }
                    }
                }
            });

        // kernel and bias gradients accumulate across samples
        let mut dk = vec![0.0; oc * c * kh * kw];
        let mut db = vec![0.0; oc];
        for s in 0..n {
            let x_s = &x_val[s * sample_in..(s + 1) * sample_in];
            let g_s = &g[s * sample_out..(s + 1) * sample_out];
            for o in 0..oc {
                for y in 0..oh {
                    for xx in 0..ow {
                        let gv = g_s[(o * oh + y) * ow + xx];
                        db[o] += gv;
                        if gv == 0.0 {
                            continue;
                        }
                        for ch in 0..c {
                            for i in 0..kh {
                                for j in 0..kw {
                                    dk[((o * c + ch) * kh + i) * kw + j] +=
                                        gv * x_s[ch * h * w + (y + i) * w + (xx + j)];
                                }
                            }
                        }
                    }
                }
            }
        }

        (
            Tensor::new(x_shape.clone(), dx),
            Tensor::new(k_shape.clone(), dk),
            Tensor::new(vec![oc], db),
        )
    };

    (out, Box::new(back))
}

/// 2-D max pooling over NCHW input with a square window.
///
/// `kernel` and `stride` are independent, so both the original `pool(2)`
/// (stride = kernel) and the overlapping `pool(2, stride 1)` variants are
/// expressible.
///
/// # Returns
/// - Output tensor `[n, c, (h-kernel)/stride+1, (w-kernel)/stride+1]`
/// - Backward function routing `dL/dy` to each window's argmax position
///
/// # Panics
/// - If the window does not fit inside the image or `stride == 0`.
pub fn maxpool2d(x: &Ten64, kernel: usize, stride: usize) -> (Ten64, Box<UnaryBack>) {
    assert_eq!(x.shape.len(), 4, "maxpool2d expects NCHW input");
    assert!(stride > 0, "maxpool2d stride must be positive");
    let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    assert!(kernel <= h && kernel <= w, "maxpool2d window larger than input");
    let oh = (h - kernel) / stride + 1;
    let ow = (w - kernel) / stride + 1;

    let planes = n * c;
    let plane_in = h * w;
    let plane_out = oh * ow;

    let x_data = &x.data;
    let mut out_data = vec![0.0; planes * plane_out];
    let mut argmax = vec![0usize; planes * plane_out];

    out_data
        .par_chunks_mut(plane_out)
        .zip(argmax.par_chunks_mut(plane_out))
        .enumerate()
        .for_each(|(p, (out_p, idx_p))| {
            let x_p = &x_data[p * plane_in..(p + 1) * plane_in];
            for y in 0..oh {
                for xx in 0..ow {
                    let mut best = f64::NEG_INFINITY;
                    let mut best_at = 0;
                    for i in 0..kernel {
                        for j in 0..kernel {
                            let at = (y * stride + i) * w + (xx * stride + j);
                            if x_p[at] > best {
                                best = x_p[at];
                                best_at = at;
                            }
                        }
                    }
                    out_p[y * ow + xx] = best;
                    idx_p[y * ow + xx] = p * plane_in + best_at;
                }
            }
        });

    let out = Tensor::new(vec![n, c, oh, ow], out_data);
    let in_shape = x.shape.clone();
    let in_len = x.data.len();

    let back = move |grad: &Ten64| {
        assert_eq!(
            grad.data.len(),
            argmax.len(),
            "maxpool2d backward shape mismatch"
        );
        let mut dx = vec![0.0; in_len];
        for (&src, &g) in argmax.iter().zip(&grad.data) {
            dx[src] += g;
        }
        Tensor::new(in_shape.clone(), dx)
    };

    (out, Box::new(back))
}

/// Applies the ReLU activation `max(0, x)` elementwise.
///
/// # Returns
/// - Output tensor of same shape
/// - Backward function passing gradients only where the input was positive
pub fn relu(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    let shape = input.shape.clone();
    let mut data = vec![0.0f64; input.data.len()];

    data.par_iter_mut()
        .zip(input.data.par_iter())
        .for_each(|(y, &x)| {
            *y = if x > 0.0 { x } else { 0.0 };
        });

    let out = Tensor::new(shape.clone(), data);
    let input_data = input.data.clone();

    let back = move |grad_output: &Ten64| {
        let mut grad = vec![0.0f64; grad_output.data.len()];
        grad.par_iter_mut()
            .zip(input_data.par_iter())
            .zip(grad_output.data.par_iter())
            .for_each(|((g, &x), &dy)| {
                *g = if x > 0.0 { dy } else { 0.0 };
            });
        Tensor::new(shape.clone(), grad)
    };

    (out, Box::new(back))
}

/// Leaky ReLU with the conventional 0.01 negative slope.
pub fn leaky_relu(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    const SLOPE: f64 = 0.01;
    let shape = input.shape.clone();
    let mut data = vec![0.0f64; input.data.len()];

    data.par_iter_mut()
        .zip(input.data.par_iter())
        .for_each(|(y, &x)| {
            *y = if x > 0.0 { x } else { SLOPE * x };
        });

    let out = Tensor::new(shape.clone(), data);
    let input_data = input.data.clone();

    let back = move |grad_output: &Ten64| {
        let mut grad = vec![0.0f64; grad_output.data.len()];
        grad.par_iter_mut()
            .zip(input_data.par_iter())
            .zip(grad_output.data.par_iter())
            .for_each(|((g, &x), &dy)| {
                *g = if x > 0.0 { dy } else { SLOPE * dy };
            });
        Tensor::new(shape.clone(), grad)
    };

    (out, Box::new(back))
}

/// Logistic sigmoid `1 / (1 + e^-x)`.
///
/// The backward pass reuses the forward output: `dy · s · (1 - s)`.
pub fn sigmoid(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    let shape = input.shape.clone();
    let mut data = vec![0.0f64; input.data.len()];

    data.par_iter_mut()
        .zip(input.data.par_iter())
        .for_each(|(y, &x)| {
            *y = 1.0 / (1.0 + (-x).exp());
        });

    let out = Tensor::new(shape.clone(), data);
    let out_data = out.data.clone();

    let back = move |grad_output: &Ten64| {
        let grad: Vec<f64> = out_data
            .par_iter()
            .zip(grad_output.data.par_iter())
            .map(|(&s, &dy)| dy * s * (1.0 - s))
            .collect();
        Tensor::new(shape.clone(), grad)
    };

    (out, Box::new(back))
}

/// Hyperbolic tangent activation.
///
/// The backward pass reuses the forward output: `dy · (1 - t²)`.
pub fn tanh(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    let shape = input.shape.clone();
    let mut data = vec![0.0f64; input.data.len()];

    data.par_iter_mut()
        .zip(input.data.par_iter())
        .for_each(|(y, &x)| {
            *y = x.tanh();
        });

    let out = Tensor::new(shape.clone(), data);
    let out_data = out.data.clone();

    let back = move |grad_output: &Ten64| {
        let grad: Vec<f64> = out_data
            .par_iter()
            .zip(grad_output.data.par_iter())
            .map(|(&t, &dy)| dy * (1.0 - t * t))
            .collect();
        Tensor::new(shape.clone(), grad)
    };

    (out, Box::new(back))
}

/// Numerically stable softmax over the last axis. Forward only: the model
/// emits logits and the loss owns its own softmax, so this is used purely
/// for inference-time probability display.
pub fn softmax(input: &Ten64) -> Ten64 {
    let width = *input
        .shape
        .last()
        .expect("softmax on rank-0 tensor");
    let mut data = input.data.clone();
    for row in data.chunks_mut(width) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    Tensor::new(input.shape.clone(), data)
}

/// Cross-entropy loss over raw logits against one-hot targets, averaged over
/// the rows of the leading axes.
///
/// The softmax lives inside this op: callers feed unnormalized class scores.
///
/// # Returns
/// - Scalar loss
/// - Backward function mapping an upstream scalar gradient to
///   `(softmax - target) · dL / n` over the logits
///
/// # Panics
/// Panics if shapes of `logits` and `target` differ.
pub fn cross_entropy_logits(logits: &Ten64, target: &Ten64) -> (f64, Box<LossBack>) {
    assert_eq!(
        logits.shape, target.shape,
        "cross entropy shape mismatch"
    );
    let rank = logits.shape.len();
    assert!(rank >= 1, "cross entropy on rank-0 tensor");
    let last_dim = logits.shape[rank - 1];
    let outer_size: usize = logits.shape[..rank - 1].iter().product();

    let pred_data = &logits.data;
    let target_data = target.data.clone();

    let mut softmax = vec![0.0f64; pred_data.len()];
    let mut loss_sum = 0.0f64;

    for i in 0..outer_size {
        let offset = i * last_dim;
        let slice = &pred_data[offset..offset + last_dim];
        let t_slice = &target_data[offset..offset + last_dim];

        let max_val = slice.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp_sum: f64 = slice.iter().map(|&x| (x - max_val).exp()).sum();

        for j in 0..last_dim {
            let s = (slice[j] - max_val).exp() / exp_sum;
            softmax[offset + j] = s;
            loss_sum -= t_slice[j] * s.ln();
        }
    }

    let n_samples = outer_size as f64;
    let loss = loss_sum / n_samples;
    let shape = logits.shape.clone();

    let back = move |grad_output: f64| {
        let mut grad = vec![0.0f64; softmax.len()];
        for i in 0..outer_size {
            let offset = i * last_dim;
            for j in 0..last_dim {
                grad[offset + j] = (softmax[offset + j] - target_data[offset + j])
                    * grad_output
                    / n_samples;
            }
        }
        Tensor::new(shape.clone(), grad)
    };

    (loss, Box::new(back))
}
