//! Adaptive moment estimation (Adam).
//!
//! The trainer uses Adam with the conventional fixed decay hyperparameters;
//! only the learning rate is configurable. The free [`adam`] function is the
//! per-tensor update rule; [`Adam`] owns the moment state for a whole
//! parameter list.

use crate::tensors::{Ten64, Tensor, WithGrad};

/// Performs one step of Adam optimization on the given parameter tensor.
///
/// # Arguments
///
/// - `w`: Tensor with gradient to be updated
/// - `m`: First moment estimate (same shape as `w`)
/// - `v`: Second moment estimate (same shape as `w`)
/// - `t`: Current timestep (1-based)
/// - `lr`: Learning rate
///
/// # Hyperparameters (hardcoded)
///
/// - beta1 = 0.9
/// - beta2 = 0.999
/// - eps = 1e-8
///
/// The gradient is zeroed after the update.
pub fn adam(w: &mut WithGrad<Ten64>, m: &mut Ten64, v: &mut Ten64, t: f64, lr: f64) {
    let beta1: f64 = 0.9;
    let beta2: f64 = 0.999;
    let eps: f64 = 1e-8;

    for ((param, grad), (m_val, v_val)) in w
        .value
        .data
        .iter_mut()
        .zip(w.grad.data.iter())
        .zip(m.data.iter_mut().zip(v.data.iter_mut()))
    {
        *m_val = beta1 * *m_val + (1.0 - beta1) * *grad;
        *v_val = beta2 * *v_val + (1.0 - beta2) * (*grad * *grad);

        let m_hat = *m_val / (1.0 - beta1.powf(t));
        let v_hat = *v_val / (1.0 - beta2.powf(t));

        *param -= lr * m_hat / (v_hat.sqrt() + eps);
    }

    w.zero_grad();
}

/// Adam state for a fixed list of parameters.
///
/// Moment tensors are allocated lazily on the first step and must then match
/// the parameter list on every subsequent step.
pub struct Adam {
    lr: f64,
    t: f64,
    moments: Vec<(Ten64, Ten64)>,
}

impl Adam {
    /// Creates an optimizer with the given learning rate.
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            t: 0.0,
            moments: Vec::new(),
        }
    }

    /// Applies one update step to every parameter, consuming and zeroing the
    /// accumulated gradients.
    ///
    /// # Panics
    /// Panics if the parameter list changes length or shape between steps.
    pub fn step(&mut self, params: &mut [&mut WithGrad<Ten64>]) {
        if self.moments.is_empty() {
            self.moments = params
                .iter()
                .map(|p| {
                    (
                        Tensor::zeros(p.value.shape.clone()),
                        Tensor::zeros(p.value.shape.clone()),
                    )
                })
                .collect();
        }
        assert_eq!(
            self.moments.len(),
            params.len(),
            "optimizer parameter list changed between steps"
        );

        self.t += 1.0;
        for (param, (m, v)) in params.iter_mut().zip(self.moments.iter_mut()) {
            adam(param, m, v, self.t, self.lr);
        }
    }
}
