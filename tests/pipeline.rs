use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use rand::SeedableRng;
use rand::rngs::StdRng;

use smallnet::batch::Batcher;
use smallnet::dataset::{
    Channels, DatasetName, labels_to_onehot, load_dataset, onehot_to_labels, parse_cifar_shard,
    parse_idx_images, parse_idx_labels,
};
use smallnet::model::{Activation, Architecture, Classifier, ModelConfig};
use smallnet::modelio::{save_weights, snapshot_path};
use smallnet::tensors::Tensor;
use smallnet::train::{evaluate, fit};

fn tmp_dir(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(name);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn fc_config(dataset: DatasetName, hidden: usize, epochs: usize) -> ModelConfig {
    ModelConfig {
        dataset,
        input_shape: [1, 2, 2],
        output_size: 10,
        hidden_size: hidden,
        activation: Activation::Leaky,
        architecture: Architecture::Fc,
        lr: 0.05,
        epochs,
    }
}

/// Two-class toy set: class 0 samples are all 0.1, class 1 all 0.9.
fn toy_dataset(n: usize) -> (Tensor<f64>, Tensor<f64>) {
    let mut pixels = Vec::with_capacity(n * 4);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let class = (i % 2) as u8;
        let value = if class == 0 { 0.1 } else { 0.9 };
        pixels.extend([value; 4]);
        labels.push(class);
    }
    (
        Tensor::new(vec![n, 1, 2, 2], pixels),
        labels_to_onehot(&labels, 10),
    )
}

// ---- encoding helpers -------------------------------------------------

fn idx_images(images: &[[u8; 4]]) -> Vec<u8> {
    let mut bytes = vec![0, 0, 8, 3];
    bytes.extend((images.len() as u32).to_be_bytes());
    bytes.extend(2u32.to_be_bytes());
    bytes.extend(2u32.to_be_bytes());
    for image in images {
        bytes.extend_from_slice(image);
    }
    bytes
}

fn idx_labels(labels: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0, 0, 8, 1];
    bytes.extend((labels.len() as u32).to_be_bytes());
    bytes.extend_from_slice(labels);
    bytes
}

fn cifar_record(label: u8) -> Vec<u8> {
    // red plane saturated, green and blue empty
    let mut record = vec![label];
    record.extend([255u8; 1024]);
    record.extend([0u8; 2048]);
    record
}

fn write_idx_files(dir: &Path, subdir: &str) {
    let idx_dir = dir.join(subdir);
    fs::create_dir_all(&idx_dir).unwrap();
    let train = [[0, 255, 128, 64], [1, 2, 3, 4], [5, 6, 7, 8]];
    let test = [[9, 9, 9, 9], [255, 0, 255, 0]];
    fs::write(idx_dir.join("train-images-idx3-ubyte"), idx_images(&train)).unwrap();
    fs::write(idx_dir.join("train-labels-idx1-ubyte"), idx_labels(&[0, 1, 2])).unwrap();
    fs::write(idx_dir.join("t10k-images-idx3-ubyte"), idx_images(&test)).unwrap();
    // test labels only as a gzip sibling, exercising transparent decompression
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&idx_labels(&[3, 4])).unwrap();
    fs::write(
        idx_dir.join("t10k-labels-idx1-ubyte.gz"),
        gz.finish().unwrap(),
    )
    .unwrap();
}

fn write_cifar_files(dir: &Path) {
    let cifar = dir.join("cifar-10");
    fs::create_dir_all(&cifar).unwrap();
    for batch in 1..=5 {
        fs::write(
            cifar.join(format!("data_batch_{batch}.bin")),
            cifar_record(batch as u8),
        )
        .unwrap();
    }
    fs::write(cifar.join("test_batch.bin"), cifar_record(3)).unwrap();
}

// ---- dataset ----------------------------------------------------------

#[test]
fn test_onehot_roundtrip() {
    let labels = [0u8, 9, 4, 4, 1];
    let onehot = labels_to_onehot(&labels, 10);
    assert_eq!(onehot.shape, vec![5, 10]);
    for row in onehot.data.chunks(10) {
        assert_eq!(row.iter().sum::<f64>(), 1.0);
    }
    let decoded: Vec<u8> = onehot_to_labels(&onehot).iter().map(|&l| l as u8).collect();
    assert_eq!(decoded, labels);
}

#[test]
fn test_onehot_out_of_range_panics() {
    let result = std::panic::catch_unwind(|| labels_to_onehot(&[10], 10));
    assert!(result.is_err());
}

#[test]
fn test_parse_idx_roundtrip() {
    let (count, rows, cols, pixels) = parse_idx_images(&idx_images(&[[0, 255, 128, 64]])).unwrap();
    assert_eq!((count, rows, cols), (1, 2, 2));
    assert_eq!(pixels[0], 0.0);
    assert_eq!(pixels[1], 1.0);
    assert_eq!(pixels[3], 64.0 / 255.0);

    let labels = parse_idx_labels(&idx_labels(&[7, 1])).unwrap();
    assert_eq!(labels, vec![7, 1]);
}

#[test]
fn test_parse_idx_rejects_bad_magic() {
    let mut bytes = idx_images(&[[0; 4]]);
    bytes[3] = 1;
    assert!(parse_idx_images(&bytes).is_err());
    assert!(parse_idx_labels(&[0, 0, 8, 3, 0, 0, 0, 0]).is_err());
}

#[test]
fn test_parse_idx_rejects_truncation() {
    let mut bytes = idx_images(&[[0; 4], [0; 4]]);
    bytes.truncate(bytes.len() - 1);
    assert!(parse_idx_images(&bytes).is_err());
}

#[test]
fn test_parse_cifar_shard() {
    let mut bytes = cifar_record(5);
    bytes.extend(cifar_record(2));
    let (pixels, labels) = parse_cifar_shard(&bytes).unwrap();
    assert_eq!(labels, vec![5, 2]);
    assert_eq!(pixels.len(), 2 * 3072);
    assert_eq!(pixels[0], 1.0);
    assert_eq!(pixels[1024], 0.0);

    assert!(parse_cifar_shard(&bytes[1..]).is_err());
}

#[test]
fn test_load_mnist_channel_first() {
    let dir = tmp_dir("mnist_first");
    write_idx_files(&dir, "mnist");

    let data = load_dataset(DatasetName::Mnist, Channels::First, None, &dir).unwrap();
    assert_eq!(data.train_images.shape, vec![3, 1, 2, 2]);
    assert_eq!(data.test_images.shape, vec![2, 1, 2, 2]);
    assert_eq!(data.input_shape, [1, 2, 2]);
    assert_eq!(data.num_classes, 10);
    assert_eq!(data.train_images.data[1], 1.0);
    assert!(
        data.train_images
            .data
            .iter()
            .chain(&data.test_images.data)
            .all(|&p| (0.0..=1.0).contains(&p))
    );
    // gz-only test labels decoded correctly
    assert_eq!(onehot_to_labels(&data.test_labels), vec![3, 4]);
}

#[test]
fn test_load_mnist_cap_preserves_prefix() {
    let dir = tmp_dir("mnist_cap");
    write_idx_files(&dir, "mnist");

    let full = load_dataset(DatasetName::Mnist, Channels::First, None, &dir).unwrap();
    let capped = load_dataset(DatasetName::Mnist, Channels::First, Some(2), &dir).unwrap();
    assert_eq!(capped.train_images.shape[0], 2);
    assert_eq!(capped.train_labels.shape[0], 2);
    assert_eq!(capped.train_images.data[..8], full.train_images.data[..8]);

    // caps beyond the dataset are harmless
    let over = load_dataset(DatasetName::Mnist, Channels::First, Some(100), &dir).unwrap();
    assert_eq!(over.train_images.shape[0], 3);
}

#[test]
fn test_load_fashion_mnist() {
    let dir = tmp_dir("fashion");
    write_idx_files(&dir, "fashion-mnist");

    let data = load_dataset(DatasetName::FashionMnist, Channels::First, None, &dir).unwrap();
    assert_eq!(data.train_images.shape[0], data.train_labels.shape[0]);
    assert_eq!(data.test_images.shape[0], data.test_labels.shape[0]);
    assert_eq!(data.input_shape, [1, 2, 2]);
    assert!(
        data.train_images
            .data
            .iter()
            .chain(&data.test_images.data)
            .all(|&p| (0.0..=1.0).contains(&p))
    );
    assert_eq!(onehot_to_labels(&data.train_labels), vec![0, 1, 2]);

    // files live under their own subdirectory, not the mnist one
    assert!(!dir.join("mnist").exists());
}

#[test]
fn test_load_cifar_layouts() {
    let dir = tmp_dir("cifar_layouts");
    write_cifar_files(&dir);

    let first = load_dataset(DatasetName::Cifar, Channels::First, None, &dir).unwrap();
    assert_eq!(first.train_images.shape, vec![5, 3, 32, 32]);
    assert_eq!(first.input_shape, [3, 32, 32]);
    assert_eq!(first.train_images.data[0], 1.0);
    assert_eq!(first.train_images.data[1024], 0.0);
    assert_eq!(onehot_to_labels(&first.train_labels), vec![1, 2, 3, 4, 5]);

    // planar source becomes interleaved in channel-last layout
    let last = load_dataset(DatasetName::Cifar, Channels::Last, None, &dir).unwrap();
    assert_eq!(last.train_images.shape, vec![5, 32, 32, 3]);
    assert_eq!(last.input_shape, [32, 32, 3]);
    assert_eq!(last.train_images.data[..3], [1.0, 0.0, 0.0]);
}

#[test]
fn test_load_dataset_missing_files() {
    let dir = tmp_dir("missing");
    assert!(load_dataset(DatasetName::Cifar, Channels::First, None, &dir).is_err());
}

#[test]
fn test_dataset_name_parsing() {
    assert_eq!("mnist".parse::<DatasetName>().unwrap(), DatasetName::Mnist);
    assert_eq!(
        "fashion_mnist".parse::<DatasetName>().unwrap(),
        DatasetName::FashionMnist
    );
    assert!("imagenet".parse::<DatasetName>().is_err());
}

// ---- batching ---------------------------------------------------------

fn counting_batcher(n: usize, batch_size: usize, shuffle: bool, seed: u64) -> Batcher {
    let inputs = Tensor::new(vec![n, 1], (0..n).map(|i| i as f64).collect());
    let labels = labels_to_onehot(&vec![0u8; n], 10);
    Batcher::new(inputs, labels, batch_size, shuffle, seed)
}

fn epoch_order(batcher: &mut Batcher) -> Vec<usize> {
    batcher
        .epoch()
        .flat_map(|(inputs, _)| inputs.data.into_iter().map(|v| v as usize).collect::<Vec<_>>())
        .collect()
}

#[test]
fn test_batcher_covers_every_sample_once() {
    let mut batcher = counting_batcher(10, 3, true, 42);
    assert_eq!(batcher.num_batches(), 4);

    let sizes: Vec<usize> = batcher.epoch().map(|(inputs, _)| inputs.shape[0]).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);

    let mut seen = epoch_order(&mut batcher);
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_batcher_unshuffled_preserves_order() {
    let mut batcher = counting_batcher(8, 4, false, 0);
    assert_eq!(epoch_order(&mut batcher), (0..8).collect::<Vec<_>>());
}

#[test]
fn test_batcher_epochs_shuffle_independently() {
    let mut batcher = counting_batcher(64, 64, true, 7);
    let first = epoch_order(&mut batcher);
    let second = epoch_order(&mut batcher);
    assert_ne!(first, second);
}

#[test]
fn test_batcher_reseed_replays_order() {
    let mut batcher = counting_batcher(64, 64, true, 7).reseed_each_epoch(true);
    let first = epoch_order(&mut batcher);
    let second = epoch_order(&mut batcher);
    assert_eq!(first, second);
}

#[test]
fn test_batcher_same_seed_same_order() {
    let mut a = counting_batcher(32, 8, true, 11);
    let mut b = counting_batcher(32, 8, true, 11);
    assert_eq!(epoch_order(&mut a), epoch_order(&mut b));
}

#[test]
fn test_batcher_sample_count_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        let inputs = Tensor::zeros(vec![4, 2]);
        let labels = Tensor::zeros(vec![3, 10]);
        Batcher::new(inputs, labels, 2, false, 0);
    });
    assert!(result.is_err());
}

// ---- model ------------------------------------------------------------

#[test]
fn test_canonical_name_format() {
    let config = ModelConfig {
        dataset: DatasetName::Mnist,
        input_shape: [1, 28, 28],
        output_size: 10,
        hidden_size: 512,
        activation: Activation::Leaky,
        architecture: Architecture::Conv,
        lr: 0.01,
        epochs: 10,
    };
    assert_eq!(config.name(), "mnist_nn_hid=512_act=leaky_arch=conv_ep=10_lr=0.01");
}

#[test]
fn test_canonical_name_small_lr_uses_exponent_form() {
    let mut config = fc_config(DatasetName::Mnist, 64, 10);
    config.lr = 0.001;
    assert!(config.name().ends_with("lr=0.001"));
    config.lr = 0.0001;
    assert!(config.name().ends_with("lr=0.0001"));
    config.lr = 0.00001;
    assert!(config.name().ends_with("lr=1e-05"));
    config.lr = 0.000025;
    assert!(config.name().ends_with("lr=2.5e-05"));
}

#[test]
fn test_canonical_name_is_deterministic() {
    let a = fc_config(DatasetName::FashionMnist, 64, 10);
    let b = fc_config(DatasetName::FashionMnist, 64, 10);
    assert_eq!(a.name(), b.name());
    assert_ne!(a.name(), fc_config(DatasetName::FashionMnist, 128, 10).name());
}

#[test]
fn test_activation_menu_is_closed() {
    assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
    assert!("gelu".parse::<Activation>().is_err());
    assert!("swish".parse::<Architecture>().is_err());
}

#[test]
fn test_forward_emits_logits_not_probabilities() {
    let mut rng = StdRng::seed_from_u64(0);
    let model = Classifier::new(fc_config(DatasetName::Mnist, 16, 1), &mut rng);
    let input = Tensor::new(vec![2, 1, 2, 2], vec![0.3; 8]);

    let logits = model.forward(&input);
    assert_eq!(logits.shape, vec![2, 10]);
    let row_sum: f64 = logits.data[..10].iter().sum();
    assert!((row_sum - 1.0).abs() > 1e-9, "forward output looks normalized");

    let probs = model.predict_proba(&input);
    let prob_sum: f64 = probs.data[..10].iter().sum();
    assert!((prob_sum - 1.0).abs() < 1e-9);
}

#[test]
fn test_conv_forward_shape() {
    let config = ModelConfig {
        dataset: DatasetName::Mnist,
        input_shape: [1, 28, 28],
        output_size: 10,
        hidden_size: 16,
        activation: Activation::Relu,
        architecture: Architecture::Conv,
        lr: 0.01,
        epochs: 1,
    };
    let mut rng = StdRng::seed_from_u64(0);
    let model = Classifier::new(config, &mut rng);
    let input = Tensor::zeros(vec![2, 1, 28, 28]);
    assert_eq!(model.forward(&input).shape, vec![2, 10]);
}

#[test]
fn test_conv_head_mismatch_panics_on_forward() {
    // hidden below 16 makes the classifier head zero-width
    let result = std::panic::catch_unwind(|| {
        let config = ModelConfig {
            dataset: DatasetName::Mnist,
            input_shape: [1, 28, 28],
            output_size: 10,
            hidden_size: 8,
            activation: Activation::Relu,
            architecture: Architecture::Conv,
            lr: 0.01,
            epochs: 1,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let model = Classifier::new(config, &mut rng);
        model.forward(&Tensor::zeros(vec![1, 1, 28, 28]));
    });
    assert!(result.is_err());
}

#[test]
fn test_fc2_forward_shape_and_learns() {
    let base = tmp_dir("fc2_fit");
    let (inputs, labels) = toy_dataset(40);

    let mut config = fc_config(DatasetName::Mnist, 8, 20);
    config.architecture = Architecture::Fc2;
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = Classifier::new(config, &mut rng);

    let logits = model.forward(&Tensor::zeros(vec![3, 1, 2, 2]));
    assert_eq!(logits.shape, vec![3, 10]);
    // three linear layers, each a weight/bias pair
    assert_eq!(model.named_params().len(), 6);

    let mut batches = Batcher::new(inputs.clone(), labels.clone(), 8, true, 0);
    let report = fit(&mut model, &mut batches, &base).unwrap();
    assert!(report.stats.last().unwrap().loss < report.stats[0].loss);

    let mut eval = Batcher::new(inputs, labels, 8, false, 0);
    let accuracy = evaluate(&model, &mut eval);
    assert!(accuracy > 60.0, "toy problem not learned: {accuracy}");
}

#[test]
fn test_same_seed_same_model() {
    let input = Tensor::new(vec![1, 1, 2, 2], vec![0.1, 0.2, 0.3, 0.4]);
    let mut rng_a = StdRng::seed_from_u64(5);
    let mut rng_b = StdRng::seed_from_u64(5);
    let a = Classifier::new(fc_config(DatasetName::Mnist, 16, 1), &mut rng_a);
    let b = Classifier::new(fc_config(DatasetName::Mnist, 16, 1), &mut rng_b);
    assert_eq!(a.forward(&input).data, b.forward(&input).data);
}

// ---- training and persistence ------------------------------------------

#[test]
fn test_fit_writes_one_snapshot_and_learns() {
    let base = tmp_dir("fit_snapshot");
    let (inputs, labels) = toy_dataset(40);

    let config = fc_config(DatasetName::Mnist, 8, 20);
    let name = config.name();
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = Classifier::new(config, &mut rng);
    let mut batches = Batcher::new(inputs.clone(), labels.clone(), 8, true, 0);

    let report = fit(&mut model, &mut batches, &base).unwrap();

    assert_eq!(report.stats.len(), 20);
    assert!(report.stats.last().unwrap().loss < report.stats[0].loss);
    for s in &report.stats {
        assert!(s.accuracy >= 0.0 && s.accuracy <= 100.0);
    }

    // exactly one artifact, at the documented location
    assert_eq!(report.snapshot, snapshot_path(&base, &name));
    assert!(report.snapshot.exists());
    let entries: Vec<_> = fs::read_dir(base.join(&name)).unwrap().collect();
    assert_eq!(entries.len(), 1);

    let mut eval = Batcher::new(inputs, labels, 8, false, 0);
    let accuracy = evaluate(&model, &mut eval);
    assert!(accuracy > 60.0, "toy problem not learned: {accuracy}");
}

#[test]
fn test_snapshot_roundtrip_preserves_forward() {
    let base = tmp_dir("roundtrip");
    let input = Tensor::new(vec![3, 1, 2, 2], vec![0.5; 12]);

    let mut rng = StdRng::seed_from_u64(1);
    let trained = Classifier::new(fc_config(DatasetName::Mnist, 16, 2), &mut rng);
    trained.save(&base).unwrap();

    // a differently-initialized model converges to the stored weights
    let mut rng2 = StdRng::seed_from_u64(99);
    let mut restored = Classifier::new(fc_config(DatasetName::Mnist, 16, 2), &mut rng2);
    assert_ne!(trained.forward(&input).data, restored.forward(&input).data);

    restored.load(&base).unwrap();
    assert_eq!(trained.forward(&input).data, restored.forward(&input).data);
}

#[test]
fn test_load_missing_snapshot_errors() {
    let base = tmp_dir("no_snapshot");
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = Classifier::new(fc_config(DatasetName::Mnist, 16, 2), &mut rng);
    assert!(model.load(&base).is_err());
}

#[test]
fn test_load_rejects_mismatched_snapshot() {
    let base = tmp_dir("bad_snapshot");
    let config = fc_config(DatasetName::Mnist, 16, 2);
    let path = snapshot_path(&base, &config.name());

    // stored mapping disagrees with the model layout
    let stray = Tensor::zeros(vec![2, 2]);
    save_weights(&path, &[("l1.weight".to_string(), &stray)]).unwrap();

    let mut rng = StdRng::seed_from_u64(0);
    let mut model = Classifier::new(config, &mut rng);
    let err = model.load(&base).unwrap_err().to_string();
    assert!(err.contains("tensors"), "unexpected error: {err}");
}

#[test]
fn test_snapshot_path_layout() {
    let path = snapshot_path(Path::new("saved_models"), "mnist_nn_hid=64");
    assert_eq!(
        path,
        Path::new("saved_models")
            .join("mnist_nn_hid=64")
            .join("mnist_nn_hid=64_weights.bpat")
    );
}
