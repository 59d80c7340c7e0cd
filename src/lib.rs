//! # smallnet
//!
//! A compact training and evaluation pipeline for small feed-forward and
//! convolutional classifiers over MNIST-family datasets, built on a minimal
//! tensor engine with hand-written backward passes.
//!
//! ## Features
//! - N-dimensional `f64` tensors with gradient-carrying wrappers
//! - Differentiable ops: matmul, linear, conv2d, maxpool2d, relu, leaky
//!   relu, sigmoid, tanh, cross-entropy over logits
//! - Rayon-parallel CPU kernels behind a backend dispatch layer
//! - Dataset loading for MNIST, Fashion-MNIST (IDX) and CIFAR-10 (binary
//!   shards), with optional download support
//! - Shuffling mini-batch iteration with explicit seeding
//! - Three fixed architectures (`fc`, `fc2`, `conv`) over a closed
//!   activation menu
//! - Adam training with per-epoch loss/accuracy reporting
//! - Validated `.bpat` weight snapshots at deterministic, name-derived paths
//!
//! ## Example
//!
//! ```rust,no_run
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use smallnet::batch::Batcher;
//! use smallnet::dataset::{Channels, DatasetName, load_dataset};
//! use smallnet::model::{Activation, Architecture, Classifier, ModelConfig};
//! use smallnet::train;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = load_dataset(DatasetName::Mnist, Channels::First, Some(1000), "data".as_ref())?;
//! let config = ModelConfig {
//!     dataset: DatasetName::Mnist,
//!     input_shape: data.input_shape,
//!     output_size: data.num_classes,
//!     hidden_size: 64,
//!     activation: Activation::Leaky,
//!     architecture: Architecture::Fc,
//!     lr: 0.001,
//!     epochs: 3,
//! };
//! let mut rng = StdRng::seed_from_u64(0);
//! let mut model = Classifier::new(config, &mut rng);
//! let mut batches = Batcher::new(data.train_images, data.train_labels, 64, true, 0);
//! let report = train::fit(&mut model, &mut batches, "saved_models".as_ref())?;
//! println!("snapshot at {}", report.snapshot.display());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod dataset;
pub mod model;
pub mod modelio;
pub mod ops;
pub mod optim;
pub mod tensors;
pub mod train;
