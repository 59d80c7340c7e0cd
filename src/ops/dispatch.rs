//! Operation dispatch layer.
//!
//! This module selects the backend for each differentiable operation based
//! on the global [`Backend`](crate::backend::Backend). This crate compiles
//! only the CPU kernels, so requesting an accelerator degrades to the CPU
//! path — the same fallback a build without accelerator kernels takes.
//!
//! Callers (the model, the trainer, tests) go through this module rather
//! than `ops::cpu` directly, so adding an accelerated implementation later
//! is a local change.

use crate::backend::{Backend, get_backend};
use crate::tensors::Ten64;

use super::cpu;

/// Backward closure of a unary op: `dL/d(out)` → `dL/d(in)`.
pub type UnaryBack = dyn Fn(&Ten64) -> Ten64;
/// Backward closure of `matmul`: `dL/dC` → `(dL/dA, dL/dB)`.
pub type MatmulBack = dyn Fn(&Ten64) -> (Ten64, Ten64);
/// Backward closure of a parameterized layer: `dL/dy` → `(dx, dweights, dbias)`.
pub type AffineBack = dyn Fn(&Ten64) -> (Ten64, Ten64, Ten64);
/// Backward closure of a scalar loss: upstream scalar → logits gradient.
pub type LossBack = dyn Fn(f64) -> Ten64;

fn cpu_fallback() {
    match get_backend() {
        Backend::Cpu => {}
        other => log::trace!("{other:?} kernels not compiled in, using cpu"),
    }
}

/// Dispatches matrix multiplication to the selected backend.
pub fn matmul(a: &Ten64, b: &Ten64) -> (Ten64, Box<MatmulBack>) {
    cpu_fallback();
    cpu::matmul(a, b)
}

/// Dispatches the fully-connected layer to the selected backend.
pub fn linear(x: &Ten64, w: &Ten64, b: &Ten64) -> (Ten64, Box<AffineBack>) {
    cpu_fallback();
    cpu::linear(x, w, b)
}

/// Dispatches the 2-D convolution to the selected backend.
pub fn conv2d(x: &Ten64, kernel: &Ten64, bias: &Ten64) -> (Ten64, Box<AffineBack>) {
    cpu_fallback();
    cpu::conv2d(x, kernel, bias)
}

/// Dispatches 2-D max pooling to the selected backend.
pub fn maxpool2d(x: &Ten64, kernel: usize, stride: usize) -> (Ten64, Box<UnaryBack>) {
    cpu_fallback();
    cpu::maxpool2d(x, kernel, stride)
}

/// Dispatches the ReLU activation to the selected backend.
pub fn relu(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    cpu_fallback();
    cpu::relu(input)
}

/// Dispatches the leaky ReLU activation to the selected backend.
pub fn leaky_relu(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    cpu_fallback();
    cpu::leaky_relu(input)
}

/// Dispatches the sigmoid activation to the selected backend.
pub fn sigmoid(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    cpu_fallback();
    cpu::sigmoid(input)
}

/// Dispatches the tanh activation to the selected backend.
pub fn tanh(input: &Ten64) -> (Ten64, Box<UnaryBack>) {
    cpu_fallback();
    cpu::tanh(input)
}

/// Dispatches the forward-only softmax to the selected backend.
pub fn softmax(input: &Ten64) -> Ten64 {
    cpu_fallback();
    cpu::softmax(input)
}

/// Dispatches the cross-entropy loss to the selected backend.
pub fn cross_entropy_logits(logits: &Ten64, target: &Ten64) -> (f64, Box<LossBack>) {
    cpu_fallback();
    cpu::cross_entropy_logits(logits, target)
}
