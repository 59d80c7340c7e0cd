//! Classifier configuration and the three fixed architectures.
//!
//! A [`Classifier`] is a configuration-driven assembly of one of three
//! topologies over a chosen activation:
//!
//! - `fc`:   flatten → linear(input→hidden) → act → linear(hidden→classes)
//! - `fc2`:  flatten → linear(input→hidden) → act → linear(hidden→hidden)
//!   → act → linear(hidden→classes)
//! - `conv`: conv(in→32, k5) → act → pool(2) → conv(32→hidden, k5) → act
//!   → pool(2, stride 1) → flatten → linear((hidden/16)·input→classes)
//!
//! The forward pass produces **logits** — unnormalized class scores.
//! Normalization happens only at the loss boundary
//! ([`cross_entropy_logits`](crate::ops::dispatch::cross_entropy_logits))
//! and for inference-time display ([`Classifier::predict_proba`]).
//!
//! The conv head's flat size, `(hidden/16) · input_size`, is only
//! dimensionally valid for matching (hidden, input shape) combinations; the
//! mismatch is not checked at construction and surfaces as a shape panic on
//! the first forward pass.
//!
//! Activation and architecture names form closed enumerations: anything
//! outside the menu is rejected at parse time with a descriptive error.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rand::Rng;

use crate::dataset::DatasetName;
use crate::modelio;
use crate::ops::dispatch as ops;
use crate::ops::dispatch::{AffineBack, UnaryBack};
use crate::tensors::{Ten64, Tensor, WithGrad};

/// The closed menu of activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Leaky,
    Sigm,
    Tanh,
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relu" => Ok(Self::Relu),
            "leaky" => Ok(Self::Leaky),
            "sigm" => Ok(Self::Sigm),
            "tanh" => Ok(Self::Tanh),
            other => Err(format!(
                "unknown activation `{other}` (expected relu, leaky, sigm or tanh)"
            )),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relu => "relu",
            Self::Leaky => "leaky",
            Self::Sigm => "sigm",
            Self::Tanh => "tanh",
        })
    }
}

/// The closed menu of network topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Fc,
    Fc2,
    Conv,
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fc" => Ok(Self::Fc),
            "fc2" => Ok(Self::Fc2),
            "conv" => Ok(Self::Conv),
            other => Err(format!(
                "unknown architecture `{other}` (expected fc, fc2 or conv)"
            )),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fc => "fc",
            Self::Fc2 => "fc2",
            Self::Conv => "conv",
        })
    }
}

/// Immutable description of a classifier: dataset, topology and the
/// training hyperparameters. Two identical configurations share the same
/// canonical name and therefore the same snapshot path.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub dataset: DatasetName,
    /// Per-sample shape in channel-first layout, e.g. `[1, 28, 28]`.
    pub input_shape: [usize; 3],
    pub output_size: usize,
    pub hidden_size: usize,
    pub activation: Activation,
    pub architecture: Architecture,
    pub lr: f64,
    pub epochs: usize,
}

impl ModelConfig {
    /// Canonical name: a pure function of the configuration fields, used as
    /// the persistence key. The format is a compatibility contract:
    /// `mnist_nn_hid=512_act=leaky_arch=conv_ep=10_lr=0.01`.
    pub fn name(&self) -> String {
        format!(
            "{}_nn_hid={}_act={}_arch={}_ep={}_lr={}",
            self.dataset,
            self.hidden_size,
            self.activation,
            self.architecture,
            self.epochs,
            lr_key(self.lr)
        )
    }
}

/// Learning-rate field of the canonical name. Existing snapshot names render
/// rates below 1e-4 in exponent form with a two-digit exponent (`1e-05`),
/// which `{}` formatting does not produce.
fn lr_key(lr: f64) -> String {
    if lr > 0.0 && lr < 1e-4 {
        let formatted = format!("{lr:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        format!("{mantissa}e-{:02}", -exponent)
    } else {
        format!("{lr}")
    }
}

enum Layer {
    Flatten,
    Linear { w: WithGrad<Ten64>, b: WithGrad<Ten64> },
    Conv2d { k: WithGrad<Ten64>, b: WithGrad<Ten64> },
    MaxPool2d { kernel: usize, stride: usize },
    Activation(Activation),
}

enum TapeOp {
    /// Parameterless op: maps the output gradient to the input gradient.
    Unary(Box<UnaryBack>),
    /// Parameterized op: also yields weight/bias gradients for `layer`.
    Affine { layer: usize, back: Box<AffineBack> },
    /// Flatten bookkeeping: the gradient regains the pre-flatten shape.
    Reshape(Vec<usize>),
}

/// Gradient bookkeeping recorded by one training forward pass.
pub struct Tape(Vec<TapeOp>);

/// A configured model holding its parameter set.
pub struct Classifier {
    pub config: ModelConfig,
    layers: Vec<Layer>,
}

impl Classifier {
    /// Builds the topology selected by the configuration, drawing initial
    /// weights from the caller's generator.
    pub fn new<R: Rng + ?Sized>(config: ModelConfig, rng: &mut R) -> Self {
        let input_size: usize = config.input_shape.iter().product();
        let in_channels = config.input_shape[0];
        let hidden = config.hidden_size;
        let classes = config.output_size;
        let act = config.activation;

        let layers = match config.architecture {
            Architecture::Fc => vec![
                Layer::Flatten,
                linear_layer(input_size, hidden, rng),
                Layer::Activation(act),
                linear_layer(hidden, classes, rng),
            ],
            Architecture::Fc2 => vec![
                Layer::Flatten,
                linear_layer(input_size, hidden, rng),
                Layer::Activation(act),
                linear_layer(hidden, hidden, rng),
                Layer::Activation(act),
                linear_layer(hidden, classes, rng),
            ],
            Architecture::Conv => vec![
                conv_layer(in_channels, 32, 5, rng),
                Layer::Activation(act),
                Layer::MaxPool2d { kernel: 2, stride: 2 },
                conv_layer(32, hidden, 5, rng),
                Layer::Activation(act),
                Layer::MaxPool2d { kernel: 2, stride: 1 },
                Layer::Flatten,
                // unchecked precondition: only valid where the pooled
                // feature map really is (hidden/16)·input_size wide; a
                // mismatch panics at the first forward pass
                linear_layer((hidden / 16) * input_size, classes, rng),
            ],
        };

        Self { config, layers }
    }

    /// Inference forward pass: logits for a batch.
    pub fn forward(&self, input: &Ten64) -> Ten64 {
        self.forward_train(input).0
    }

    /// Class probabilities for a batch (softmax over logits).
    pub fn predict_proba(&self, input: &Ten64) -> Ten64 {
        ops::softmax(&self.forward(input))
    }

    /// Training forward pass: logits plus the tape needed by
    /// [`Classifier::backward`].
    pub fn forward_train(&self, input: &Ten64) -> (Ten64, Tape) {
        let mut tape = Vec::with_capacity(self.layers.len());
        let mut cur = input.clone();

        for (i, layer) in self.layers.iter().enumerate() {
            cur = match layer {
                Layer::Flatten => {
                    tape.push(TapeOp::Reshape(cur.shape.clone()));
                    let n = cur.shape[0];
                    let rest = cur.data.len() / n.max(1);
                    Tensor::new(vec![n, rest], cur.data)
                }
                Layer::Linear { w, b } => {
                    let (out, back) = ops::linear(&cur, &w.value, &b.value);
                    tape.push(TapeOp::Affine { layer: i, back });
                    out
                }
                Layer::Conv2d { k, b } => {
                    let (out, back) = ops::conv2d(&cur, &k.value, &b.value);
                    tape.push(TapeOp::Affine { layer: i, back });
                    out
                }
                Layer::MaxPool2d { kernel, stride } => {
                    let (out, back) = ops::maxpool2d(&cur, *kernel, *stride);
                    tape.push(TapeOp::Unary(back));
                    out
                }
                Layer::Activation(act) => {
                    let (out, back) = match act {
                        Activation::Relu => ops::relu(&cur),
                        Activation::Leaky => ops::leaky_relu(&cur),
                        Activation::Sigm => ops::sigmoid(&cur),
                        Activation::Tanh => ops::tanh(&cur),
                    };
                    tape.push(TapeOp::Unary(back));
                    out
                }
            };
        }

        (cur, Tape(tape))
    }

    /// Walks the tape in reverse, accumulating parameter gradients.
    ///
    /// `grad` is `dL/d(logits)`, typically from the loss backward closure.
    pub fn backward(&mut self, tape: Tape, mut grad: Ten64) {
        for op in tape.0.into_iter().rev() {
            grad = match op {
                TapeOp::Unary(back) => back(&grad),
                TapeOp::Reshape(shape) => Tensor::new(shape, grad.data),
                TapeOp::Affine { layer, back } => {
                    let (dx, dw, db) = back(&grad);
                    match &mut self.layers[layer] {
                        Layer::Linear { w, b } | Layer::Conv2d { k: w, b } => {
                            w.accumulate(&dw);
                            b.accumulate(&db);
                        }
                        _ => unreachable!("affine tape entry on parameterless layer"),
                    }
                    dx
                }
            };
        }
    }

    /// The layer-identifier → tensor mapping persisted in snapshots, in
    /// layer order.
    pub fn named_params(&self) -> Vec<(String, &Ten64)> {
        let mut out = Vec::new();
        let mut ordinal = 0;
        for layer in &self.layers {
            match layer {
                Layer::Linear { w, b } => {
                    ordinal += 1;
                    out.push((format!("l{ordinal}.weight"), &w.value));
                    out.push((format!("l{ordinal}.bias"), &b.value));
                }
                Layer::Conv2d { k, b } => {
                    ordinal += 1;
                    out.push((format!("l{ordinal}.kernel"), &k.value));
                    out.push((format!("l{ordinal}.bias"), &b.value));
                }
                _ => {}
            }
        }
        out
    }

    /// Mutable access to every trainable parameter, in the same order as
    /// [`Classifier::named_params`].
    pub fn params_mut(&mut self) -> Vec<&mut WithGrad<Ten64>> {
        let mut out = Vec::new();
        for layer in &mut self.layers {
            match layer {
                Layer::Linear { w, b } | Layer::Conv2d { k: w, b } => {
                    out.push(w);
                    out.push(b);
                }
                _ => {}
            }
        }
        out
    }

    /// Serializes the parameter mapping to the canonical snapshot path under
    /// `base_dir`, creating directories as needed.
    pub fn save(&self, base_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
        let path = modelio::snapshot_path(base_dir, &self.config.name());
        log::info!("saving snapshot {}", path.display());
        modelio::save_weights(&path, &self.named_params())?;
        Ok(path)
    }

    /// Loads the snapshot for this configuration, replacing the live
    /// parameter values.
    ///
    /// # Errors
    /// - Not-found if no snapshot exists at the canonical path.
    /// - A descriptive error if the stored mapping disagrees with the live
    ///   model on tensor count, names or shapes; the model is untouched in
    ///   that case.
    pub fn load(&mut self, base_dir: &Path) -> Result<(), Box<dyn Error>> {
        let path = modelio::snapshot_path(base_dir, &self.config.name());
        log::info!("loading snapshot {}", path.display());
        let loaded = modelio::load_weights(&path)?;

        {
            let live = self.named_params();
            if loaded.len() != live.len() {
                return Err(format!(
                    "snapshot holds {} tensors, model expects {}",
                    loaded.len(),
                    live.len()
                )
                .into());
            }
            for ((name, tensor), (live_name, live_tensor)) in loaded.iter().zip(&live) {
                if name != live_name {
                    return Err(format!(
                        "snapshot tensor `{name}` where model expects `{live_name}`"
                    )
                    .into());
                }
                if tensor.shape != live_tensor.shape {
                    return Err(format!(
                        "snapshot tensor `{name}` has shape {:?}, model expects {:?}",
                        tensor.shape, live_tensor.shape
                    )
                    .into());
                }
            }
        }

        for ((_, tensor), param) in loaded.into_iter().zip(self.params_mut()) {
            param.value.update(tensor);
            param.zero_grad();
        }
        Ok(())
    }
}

/// Uniform ±1/√fan_in weight init, zero biases.
fn init_tensor<R: Rng + ?Sized>(shape: Vec<usize>, fan_in: usize, rng: &mut R) -> Ten64 {
    let bound = 1.0 / (fan_in as f64).sqrt();
    let len = shape.iter().product();
    let data = (0..len).map(|_| rng.random_range(-bound..bound)).collect();
    Tensor::new(shape, data)
}

fn linear_layer<R: Rng + ?Sized>(input: usize, output: usize, rng: &mut R) -> Layer {
    Layer::Linear {
        w: WithGrad::new(init_tensor(vec![input, output], input, rng)),
        b: WithGrad::new(Tensor::zeros(vec![output])),
    }
}

fn conv_layer<R: Rng + ?Sized>(ic: usize, oc: usize, kernel: usize, rng: &mut R) -> Layer {
    Layer::Conv2d {
        k: WithGrad::new(init_tensor(
            vec![oc, ic, kernel, kernel],
            ic * kernel * kernel,
            rng,
        )),
        b: WithGrad::new(Tensor::zeros(vec![oc])),
    }
}
