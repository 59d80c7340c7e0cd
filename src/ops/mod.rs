//! Differentiable tensor operations.
//!
//! Every operation in this module family follows the same autograd pattern:
//!
//! 1. **Inputs** are plain tensor references; parameter gradients live in the
//!    caller's `WithGrad` wrappers.
//! 2. **Forward pass** computes an output tensor eagerly.
//! 3. **Backward pass** is a boxed closure, returned alongside the output,
//!    that maps `dL/d(out)` to gradients for each input.
//!
//! Operations panic on shape mismatches; shapes are a programmer contract,
//! not a recoverable condition.
//!
//! ## Submodules
//!
//! - [`cpu`] — rayon-parallel CPU kernels (the only compiled backend)
//! - [`dispatch`] — backend-aware entry points; callers go through these
//!
//! ## Implemented Ops
//!
//! - `matmul` / `linear`: dense layers
//! - `conv2d` / `maxpool2d`: convolutional layers (stride-1 valid conv)
//! - `relu`, `leaky_relu`, `sigmoid`, `tanh`: activations
//! - `cross_entropy_logits`: fused softmax + negative log-likelihood
//! - `softmax`: forward-only, for inference-time probabilities

pub mod cpu;
pub mod dispatch;
