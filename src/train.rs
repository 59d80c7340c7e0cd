//! Training and evaluation loops.
//!
//! [`fit`] runs the full Adam training schedule over a [`Batcher`], logging
//! one line per epoch, and writes exactly one snapshot after the final epoch.
//! [`evaluate`] runs the inference-only pass and reports top-1 accuracy as a
//! percentage.
//!
//! Loss accounting: every batch contributes its mean per-sample loss divided
//! by the dataset size, so the per-epoch figure is comparable across batch
//! sizes.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::batch::Batcher;
use crate::model::Classifier;
use crate::ops::dispatch as ops;
use crate::optim::Adam;
use crate::tensors::Ten64;

/// Loss and training accuracy observed during one epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    /// Top-1 accuracy over the training set, in percent.
    pub accuracy: f64,
}

/// Outcome of a completed training run.
pub struct TrainReport {
    pub stats: Vec<EpochStats>,
    /// Location of the single snapshot written after the final epoch.
    pub snapshot: PathBuf,
    pub elapsed: Duration,
}

/// Trains the model for its configured number of epochs and saves one
/// snapshot under `base_dir`.
///
/// # Errors
/// Fails only on snapshot I/O; the optimization itself does not error.
pub fn fit(
    model: &mut Classifier,
    batcher: &mut Batcher,
    base_dir: &Path,
) -> Result<TrainReport, Box<dyn Error>> {
    let epochs = model.config.epochs;
    let mut optimizer = Adam::new(model.config.lr);
    let n_samples = batcher.num_samples() as f64;
    let start = Instant::now();
    let mut stats = Vec::with_capacity(epochs);

    for epoch in 1..=epochs {
        let mut loss_sum = 0.0;
        let mut correct = 0usize;

        for (inputs, targets) in batcher.epoch() {
            let (logits, tape) = model.forward_train(&inputs);
            let (loss, loss_back) = ops::cross_entropy_logits(&logits, &targets);
            loss_sum += loss / n_samples;
            correct += count_correct(&logits, &targets);

            model.backward(tape, loss_back(1.0));
            optimizer.step(&mut model.params_mut());
        }

        let accuracy = 100.0 * correct as f64 / n_samples;
        log::info!("[epoch {epoch}] loss: {loss_sum:.8} accuracy: {accuracy:.2}");
        stats.push(EpochStats {
            epoch,
            loss: loss_sum,
            accuracy,
        });
    }

    let elapsed = start.elapsed();
    log::info!("trained {epochs} epochs in {:.2}s", elapsed.as_secs_f64());

    let snapshot = model.save(base_dir)?;
    Ok(TrainReport {
        stats,
        snapshot,
        elapsed,
    })
}

/// Inference-only pass over the batcher's dataset; returns top-1 accuracy in
/// percent. Does not touch gradients or optimizer state.
pub fn evaluate(model: &Classifier, batcher: &mut Batcher) -> f64 {
    let n_samples = batcher.num_samples() as f64;
    let mut correct = 0usize;
    for (inputs, targets) in batcher.epoch() {
        let logits = model.forward(&inputs);
        correct += count_correct(&logits, &targets);
    }
    100.0 * correct as f64 / n_samples
}

fn count_correct(logits: &Ten64, targets: &Ten64) -> usize {
    logits
        .argmax_rows()
        .iter()
        .zip(targets.argmax_rows())
        .filter(|&(&p, t)| p == t)
        .count()
}
