use assert_approx_eq::assert_approx_eq;
use smallnet::ops::dispatch::{
    conv2d, cross_entropy_logits, leaky_relu, linear, matmul, maxpool2d, relu, sigmoid, softmax,
    tanh,
};
use smallnet::optim::Adam;
use smallnet::tensor;
use smallnet::tensors::{IntoWithGrad, Tensor};

#[test]
fn test_matmul_forward_and_backward() {
    let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let b = tensor!([[5.0, 6.0], [7.0, 8.0]]);
    let (c, back) = matmul(&a, &b);
    assert_eq!(c.shape, vec![2, 2]);
    assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);

    let ones = Tensor::new(vec![2, 2], vec![1.0; 4]);
    let (da, db) = back(&ones);
    // dA = 1 · Bᵀ, dB = Aᵀ · 1
    assert_eq!(da.data, vec![11.0, 15.0, 11.0, 15.0]);
    assert_eq!(db.data, vec![4.0, 4.0, 6.0, 6.0]);
}

#[test]
fn test_matmul_inner_dim_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        let a = tensor!([[1.0, 2.0, 3.0]]);
        let b = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        matmul(&a, &b);
    });
    assert!(result.is_err());
}

#[test]
fn test_linear_bias_broadcast_and_gradients() {
    let x = tensor!([[1.0, 2.0]]);
    let w = tensor!([[1.0, 0.0], [0.0, 1.0]]);
    let b = Tensor::new(vec![2], vec![1.0, 1.0]);
    let (y, back) = linear(&x, &w, &b);
    assert_eq!(y.data, vec![2.0, 3.0]);

    let (dx, dw, db) = back(&Tensor::new(vec![1, 2], vec![1.0, 1.0]));
    assert_eq!(dx.data, vec![1.0, 1.0]);
    assert_eq!(dw.data, vec![1.0, 1.0, 2.0, 2.0]);
    assert_eq!(db.data, vec![1.0, 1.0]);
}

#[test]
fn test_linear_bias_gradient_sums_over_rows() {
    let x = tensor!([[1.0], [2.0], [3.0]]);
    let w = tensor!([[1.0, 1.0]]);
    let b = Tensor::new(vec![2], vec![0.0, 0.0]);
    let (_, back) = linear(&x, &w, &b);
    let (_, _, db) = back(&Tensor::new(vec![3, 2], vec![1.0; 6]));
    assert_eq!(db.data, vec![3.0, 3.0]);
}

#[test]
fn test_conv2d_valid_single_window() {
    let x = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    let k = Tensor::new(vec![1, 1, 2, 2], vec![1.0; 4]);
    let b = Tensor::new(vec![1], vec![0.5]);
    let (y, back) = conv2d(&x, &k, &b);
    assert_eq!(y.shape, vec![1, 1, 1, 1]);
    assert_approx_eq!(y.data[0], 10.5);

    let (dx, dk, db) = back(&Tensor::new(vec![1, 1, 1, 1], vec![1.0]));
    assert_eq!(dx.data, vec![1.0; 4]);
    assert_eq!(dk.data, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(db.data, vec![1.0]);
}

#[test]
fn test_conv2d_output_shape() {
    let x = Tensor::zeros(vec![2, 3, 8, 8]);
    let k = Tensor::zeros(vec![4, 3, 5, 5]);
    let b = Tensor::zeros(vec![4]);
    let (y, _) = conv2d(&x, &k, &b);
    assert_eq!(y.shape, vec![2, 4, 4, 4]);
}

#[test]
fn test_conv2d_channel_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        let x = Tensor::zeros(vec![1, 2, 4, 4]);
        let k = Tensor::zeros(vec![1, 3, 2, 2]);
        let b = Tensor::zeros(vec![1]);
        conv2d(&x, &k, &b);
    });
    assert!(result.is_err());
}

#[test]
fn test_maxpool2d_forward_and_backward() {
    let x = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 3.0, 2.0, 4.0]);
    let (y, back) = maxpool2d(&x, 2, 2);
    assert_eq!(y.shape, vec![1, 1, 1, 1]);
    assert_eq!(y.data, vec![4.0]);

    let dx = back(&Tensor::new(vec![1, 1, 1, 1], vec![1.0]));
    assert_eq!(dx.data, vec![0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_maxpool2d_overlapping_stride() {
    let x = Tensor::new(
        vec![1, 1, 3, 3],
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
    );
    let (y, back) = maxpool2d(&x, 2, 1);
    assert_eq!(y.shape, vec![1, 1, 2, 2]);
    assert_eq!(y.data, vec![5.0, 6.0, 8.0, 9.0]);

    // 9 wins one window, 5 wins one; gradients route to the argmax cells
    let dx = back(&Tensor::new(vec![1, 1, 2, 2], vec![1.0; 4]));
    assert_eq!(dx.data[4], 1.0);
    assert_eq!(dx.data[8], 1.0);
    assert_eq!(dx.data[0], 0.0);
}

#[test]
fn test_relu_backprop() {
    let input = Tensor::new(vec![3], vec![-1.0, 0.0, 2.0]);
    let (out, back) = relu(&input);
    assert_eq!(out.data, vec![0.0, 0.0, 2.0]);

    let grad_in = back(&Tensor::new(vec![3], vec![1.0, 1.0, 1.0]));
    assert_eq!(grad_in.data, vec![0.0, 0.0, 1.0]);
}

#[test]
fn test_leaky_relu_negative_slope() {
    let input = Tensor::new(vec![2], vec![-1.0, 2.0]);
    let (out, back) = leaky_relu(&input);
    assert_approx_eq!(out.data[0], -0.01);
    assert_approx_eq!(out.data[1], 2.0);

    let grad_in = back(&Tensor::new(vec![2], vec![1.0, 1.0]));
    assert_approx_eq!(grad_in.data[0], 0.01);
    assert_approx_eq!(grad_in.data[1], 1.0);
}

#[test]
fn test_sigmoid_midpoint() {
    let input = Tensor::new(vec![1], vec![0.0]);
    let (out, back) = sigmoid(&input);
    assert_approx_eq!(out.data[0], 0.5);

    let grad_in = back(&Tensor::new(vec![1], vec![1.0]));
    assert_approx_eq!(grad_in.data[0], 0.25);
}

#[test]
fn test_tanh_backprop() {
    let input = Tensor::new(vec![1], vec![0.5]);
    let (out, back) = tanh(&input);
    let t = 0.5f64.tanh();
    assert_approx_eq!(out.data[0], t);

    let grad_in = back(&Tensor::new(vec![1], vec![2.0]));
    assert_approx_eq!(grad_in.data[0], 2.0 * (1.0 - t * t));
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let logits = tensor!([[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
    let probs = softmax(&logits);
    for row in probs.data.chunks(3) {
        let sum: f64 = row.iter().sum();
        assert_approx_eq!(sum, 1.0);
        assert!(row.iter().all(|&p| p.is_finite() && p >= 0.0));
    }
    // uniform logits give uniform probabilities, even enormous ones
    assert_approx_eq!(probs.data[3], 1.0 / 3.0);
}

#[test]
fn test_cross_entropy_uniform_logits() {
    let logits = tensor!([[0.0, 0.0]]);
    let target = tensor!([[1.0, 0.0]]);
    let (loss, back) = cross_entropy_logits(&logits, &target);
    assert_approx_eq!(loss, 2.0f64.ln());

    // gradient is softmax - target, scaled by the upstream scalar
    let grad = back(1.0);
    assert_approx_eq!(grad.data[0], -0.5);
    assert_approx_eq!(grad.data[1], 0.5);
}

#[test]
fn test_cross_entropy_averages_over_rows() {
    let logits = tensor!([[0.0, 0.0], [0.0, 0.0]]);
    let target = tensor!([[1.0, 0.0], [0.0, 1.0]]);
    let (loss, back) = cross_entropy_logits(&logits, &target);
    assert_approx_eq!(loss, 2.0f64.ln());

    let grad = back(1.0);
    // per-row gradient halves with two rows
    assert_approx_eq!(grad.data[0], -0.25);
}

#[test]
fn test_adam_first_step_magnitude() {
    let mut p = Tensor::new(vec![1], vec![0.0]).with_grad();
    p.accumulate(&Tensor::new(vec![1], vec![1.0]));

    let mut opt = Adam::new(0.1);
    opt.step(&mut [&mut p]);

    // bias correction makes the first step ≈ lr regardless of grad scale
    assert_approx_eq!(p.value.data[0], -0.1, 1e-6);
    assert_eq!(p.grad.data, vec![0.0]);
}

#[test]
fn test_adam_descends_a_quadratic() {
    // minimize (x - 3)^2 from x = 0
    let mut p = Tensor::new(vec![1], vec![0.0]).with_grad();
    let mut opt = Adam::new(0.1);
    for _ in 0..200 {
        let x = p.value.data[0];
        p.accumulate(&Tensor::new(vec![1], vec![2.0 * (x - 3.0)]));
        opt.step(&mut [&mut p]);
    }
    assert!((p.value.data[0] - 3.0).abs() < 0.1);
}
