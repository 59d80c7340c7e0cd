//! Core tensor data structures.
//!
//! This module defines the representation used by every other part of the
//! crate: a flat, row-major, N-dimensional array plus a gradient-carrying
//! wrapper for trainable parameters.
//!
//! It supports:
//! - Construction of N-dimensional tensors with shape and row-major data layout
//! - Zero-filled construction for gradients and optimizer state
//! - `WithGrad` wrappers pairing a value with its accumulated gradient
//! - Row-wise argmax, the decoding step behind top-1 accuracy
//! - Compile-time tensor literals via the `tensor!` macro
//!
//! ## Design Highlights
//! - Tensors are strongly typed: `Tensor<T>` for any element type; the
//!   training pipeline works in `f64` via the [`Ten64`] alias
//! - Shape is stored as a `Vec<usize>` and enforced at runtime
//! - Shape violations are programmer errors and panic; recoverable failures
//!   (I/O, configuration) live elsewhere and return `Result`
//!
//! ## Example
//!
//! ```rust
//! use smallnet::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - All elements must be the same type (`T`).
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The element type used throughout the training pipeline.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replaces this tensor's data with another tensor of the same shape.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn update(&mut self, mut other: Tensor<T>) {
        assert_eq!(self.shape, other.shape, "shape mismatch");
        std::mem::swap(&mut self.data, &mut other.data);
    }
}

impl Tensor<f64> {
    /// Creates a zero-filled tensor of the given shape.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Index of the largest element along the last axis, one per row.
    ///
    /// For a `[n, k]` tensor this returns `n` class indices; ties resolve to
    /// the first maximum, matching the usual argmax convention.
    ///
    /// # Panics
    /// Panics on rank-0 tensors or an empty last axis.
    pub fn argmax_rows(&self) -> Vec<usize> {
        let width = *self.shape.last().expect("argmax_rows on rank-0 tensor");
        assert!(width > 0, "argmax_rows on empty last axis");
        self.data
            .chunks(width)
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }
}

/// A container for tracking gradients of values (used by the backward pass).
///
/// Typically used as `WithGrad<Ten64>` for trainable parameters.
#[derive(Debug, Clone)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl WithGrad<Ten64> {
    /// Wraps a tensor with a zero gradient of the same shape.
    pub fn new(value: Ten64) -> Self {
        let grad = Tensor::zeros(value.shape.clone());
        Self { value, grad }
    }

    /// Adds `delta` into the accumulated gradient.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn accumulate(&mut self, delta: &Ten64) {
        assert_eq!(self.grad.shape, delta.shape, "gradient shape mismatch");
        for (g, d) in self.grad.data.iter_mut().zip(&delta.data) {
            *g += d;
        }
    }

    /// Resets the accumulated gradient to zero.
    pub fn zero_grad(&mut self) {
        for g in &mut self.grad.data {
            *g = 0.0;
        }
    }
}

/// Extension trait for wrapping plain tensors into [`WithGrad`].
pub trait IntoWithGrad {
    fn with_grad(self) -> WithGrad<Ten64>;
}

impl IntoWithGrad for Ten64 {
    fn with_grad(self) -> WithGrad<Ten64> {
        WithGrad::new(self)
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use smallnet::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
