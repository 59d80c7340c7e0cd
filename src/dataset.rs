//! Dataset acquisition and normalization.
//!
//! Loads one of three image classification datasets into tensors ready for
//! the batch iterator:
//!
//! - **MNIST** and **Fashion-MNIST** from the standard IDX files (gzip
//!   archives are decompressed transparently; with the `download` feature
//!   missing files are fetched from the usual mirrors).
//! - **CIFAR-10** from the binary distribution: five training shards plus
//!   one test shard under `<data_dir>/cifar-10/`, each record one label byte
//!   followed by 3072 planar RGB bytes.
//!
//! Pixels are rescaled from `[0, 255]` to `[0.0, 1.0]`; labels become
//! one-hot rows of width 10. Images come out rank 4 in either channel-first
//! (`[n, c, h, w]`) or channel-last (`[n, h, w, c]`) layout — CIFAR's planar
//! source data is already channel-first, so channel-last requires the axis
//! permutation performed here.
//!
//! An optional sample cap truncates both splits to their first N samples,
//! order preserving. Unsupported dataset names fail at parse time, before
//! any file is touched.

use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::GzDecoder;

use crate::tensors::{Ten64, Tensor};

/// All supported datasets classify into ten classes.
pub const NUM_CLASSES: usize = 10;

const MNIST_BASE: &str = "https://storage.googleapis.com/cvdf-datasets/mnist";
const FASHION_BASE: &str = "https://storage.googleapis.com/tensorflow/tf-keras-datasets";

const IDX_FILES: [&str; 4] = [
    "train-images-idx3-ubyte",
    "train-labels-idx1-ubyte",
    "t10k-images-idx3-ubyte",
    "t10k-labels-idx1-ubyte",
];

/// The closed menu of supported datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetName {
    Mnist,
    FashionMnist,
    Cifar,
}

impl FromStr for DatasetName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mnist" => Ok(Self::Mnist),
            "fashion_mnist" => Ok(Self::FashionMnist),
            "cifar" => Ok(Self::Cifar),
            other => Err(format!(
                "unsupported dataset `{other}` (expected mnist, fashion_mnist or cifar)"
            )),
        }
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mnist => "mnist",
            Self::FashionMnist => "fashion_mnist",
            Self::Cifar => "cifar",
        })
    }
}

/// Memory layout of the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channels {
    /// `[n, c, h, w]` — what the convolutional architecture expects.
    #[default]
    First,
    /// `[n, h, w, c]`.
    Last,
}

/// A fully loaded dataset: both splits, normalized and one-hot encoded.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train_images: Ten64,
    pub train_labels: Ten64,
    pub test_images: Ten64,
    pub test_labels: Ten64,
    /// Per-sample shape in the requested layout, e.g. `[1, 28, 28]`.
    pub input_shape: [usize; 3],
    pub num_classes: usize,
}

impl Dataset {
    /// Keeps the first `min(n, len)` samples of each split, in order.
    pub fn truncate(&mut self, n: usize) {
        truncate_samples(&mut self.train_images, n);
        truncate_samples(&mut self.train_labels, n);
        truncate_samples(&mut self.test_images, n);
        truncate_samples(&mut self.test_labels, n);
    }
}

/// Loads a dataset by name, normalized to `[0, 1]` pixels and one-hot
/// labels, optionally capped to the first `n_inputs` samples per split.
///
/// Dataset files are looked up under `<data_dir>/<dataset>/`.
pub fn load_dataset(
    name: DatasetName,
    channels: Channels,
    n_inputs: Option<usize>,
    data_dir: &Path,
) -> Result<Dataset, Box<dyn Error>> {
    log::info!("loading {name}");
    let mut dataset = match name {
        DatasetName::Mnist => load_idx_dataset(&data_dir.join("mnist"), MNIST_BASE, channels)?,
        DatasetName::FashionMnist => {
            load_idx_dataset(&data_dir.join("fashion-mnist"), FASHION_BASE, channels)?
        }
        DatasetName::Cifar => load_cifar(&data_dir.join("cifar-10"), channels)?,
    };
    if let Some(n) = n_inputs {
        dataset.truncate(n);
    }
    log::debug!(
        "train images {:?}, train labels {:?}, test images {:?}, test labels {:?}",
        dataset.train_images.shape,
        dataset.train_labels.shape,
        dataset.test_images.shape,
        dataset.test_labels.shape,
    );
    Ok(dataset)
}

/// Converts integer class labels into one-hot rows of the given width.
///
/// # Panics
/// Panics if any label is out of range.
pub fn labels_to_onehot(labels: &[u8], width: usize) -> Ten64 {
    let mut data = vec![0.0; labels.len() * width];
    for (i, &label) in labels.iter().enumerate() {
        let label = label as usize;
        assert!(label < width, "label {label} out of range for {width} classes");
        data[i * width + label] = 1.0;
    }
    Tensor::new(vec![labels.len(), width], data)
}

/// Decodes one-hot rows back into class indices (argmax per row).
pub fn onehot_to_labels(onehot: &Ten64) -> Vec<usize> {
    onehot.argmax_rows()
}

/// Parses an IDX image file (magic `0x00000803`) into normalized pixels.
///
/// Returns `(count, rows, cols, pixels)` with pixels in `[0, 1]`.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(usize, usize, usize, Vec<f64>), Box<dyn Error>> {
    if bytes.len() < 16 || bytes[0..4] != [0, 0, 8, 3] {
        return Err("not an IDX image file".into());
    }
    let count = u32::from_be_bytes(bytes[4..8].try_into()?) as usize;
    let rows = u32::from_be_bytes(bytes[8..12].try_into()?) as usize;
    let cols = u32::from_be_bytes(bytes[12..16].try_into()?) as usize;
    let expected = 16 + count * rows * cols;
    if bytes.len() < expected {
        return Err(format!(
            "IDX image file truncated: expected {expected} bytes, found {}",
            bytes.len()
        )
        .into());
    }
    let pixels = bytes[16..expected]
        .iter()
        .map(|&b| f64::from(b) / 255.0)
        .collect();
    Ok((count, rows, cols, pixels))
}

/// Parses an IDX label file (magic `0x00000801`).
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>, Box<dyn Error>> {
    if bytes.len() < 8 || bytes[0..4] != [0, 0, 8, 1] {
        return Err("not an IDX label file".into());
    }
    let count = u32::from_be_bytes(bytes[4..8].try_into()?) as usize;
    if bytes.len() < 8 + count {
        return Err("IDX label file truncated".into());
    }
    Ok(bytes[8..8 + count].to_vec())
}

/// Parses one CIFAR-10 binary shard: records of 1 label byte + 3072 planar
/// RGB bytes. Returns normalized planar pixels and the labels.
pub fn parse_cifar_shard(bytes: &[u8]) -> Result<(Vec<f64>, Vec<u8>), Box<dyn Error>> {
    const RECORD: usize = 1 + 3 * 32 * 32;
    if bytes.is_empty() || bytes.len() % RECORD != 0 {
        return Err(format!(
            "CIFAR shard size {} is not a multiple of the {RECORD}-byte record",
            bytes.len()
        )
        .into());
    }
    let count = bytes.len() / RECORD;
    let mut pixels = Vec::with_capacity(count * (RECORD - 1));
    let mut labels = Vec::with_capacity(count);
    for record in bytes.chunks(RECORD) {
        labels.push(record[0]);
        pixels.extend(record[1..].iter().map(|&b| f64::from(b) / 255.0));
    }
    Ok((pixels, labels))
}

fn load_idx_dataset(
    dir: &Path,
    base_url: &str,
    channels: Channels,
) -> Result<Dataset, Box<dyn Error>> {
    let urls: Vec<String> = IDX_FILES
        .iter()
        .map(|f| format!("{base_url}/{f}.gz"))
        .collect();

    let (n_train, rows, cols, train_pixels) =
        parse_idx_images(&read_or_fetch(&dir.join(IDX_FILES[0]), Some(&urls[0]))?)?;
    let train_labels = parse_idx_labels(&read_or_fetch(&dir.join(IDX_FILES[1]), Some(&urls[1]))?)?;
    let (n_test, _, _, test_pixels) =
        parse_idx_images(&read_or_fetch(&dir.join(IDX_FILES[2]), Some(&urls[2]))?)?;
    let test_labels = parse_idx_labels(&read_or_fetch(&dir.join(IDX_FILES[3]), Some(&urls[3]))?)?;

    check_counts(n_train, train_labels.len())?;
    check_counts(n_test, test_labels.len())?;

    let (train_images, input_shape) = image_tensor(train_pixels, n_train, 1, rows, cols, channels);
    let (test_images, _) = image_tensor(test_pixels, n_test, 1, rows, cols, channels);

    Ok(Dataset {
        train_images,
        train_labels: labels_to_onehot(&train_labels, NUM_CLASSES),
        test_images,
        test_labels: labels_to_onehot(&test_labels, NUM_CLASSES),
        input_shape,
        num_classes: NUM_CLASSES,
    })
}

fn load_cifar(dir: &Path, channels: Channels) -> Result<Dataset, Box<dyn Error>> {
    let mut train_pixels = Vec::new();
    let mut train_labels = Vec::new();
    for batch in 1..=5 {
        let bytes = read_or_fetch(&dir.join(format!("data_batch_{batch}.bin")), None)?;
        let (pixels, labels) = parse_cifar_shard(&bytes)?;
        train_pixels.extend(pixels);
        train_labels.extend(labels);
    }
    let (test_pixels, test_labels) =
        parse_cifar_shard(&read_or_fetch(&dir.join("test_batch.bin"), None)?)?;

    let n_train = train_labels.len();
    let n_test = test_labels.len();
    check_counts(train_pixels.len() / (3 * 32 * 32), n_train)?;
    check_counts(test_pixels.len() / (3 * 32 * 32), n_test)?;

    let (train_images, input_shape) = image_tensor(train_pixels, n_train, 3, 32, 32, channels);
    let (test_images, _) = image_tensor(test_pixels, n_test, 3, 32, 32, channels);

    Ok(Dataset {
        train_images,
        train_labels: labels_to_onehot(&train_labels, NUM_CLASSES),
        test_images,
        test_labels: labels_to_onehot(&test_labels, NUM_CLASSES),
        input_shape,
        num_classes: NUM_CLASSES,
    })
}

/// Builds the rank-4 image tensor in the requested layout from planar
/// (channel-first) pixel data.
fn image_tensor(
    pixels: Vec<f64>,
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    channels: Channels,
) -> (Ten64, [usize; 3]) {
    match channels {
        Channels::First => (Tensor::new(vec![n, c, h, w], pixels), [c, h, w]),
        Channels::Last => {
            // interleave the planar source: [n, c, h, w] -> [n, h, w, c]
            let mut data = vec![0.0; pixels.len()];
            for s in 0..n {
                for ch in 0..c {
                    for y in 0..h {
                        for x in 0..w {
                            data[((s * h + y) * w + x) * c + ch] =
                                pixels[((s * c + ch) * h + y) * w + x];
                        }
                    }
                }
            }
            (Tensor::new(vec![n, h, w, c], data), [h, w, c])
        }
    }
}

fn truncate_samples(t: &mut Ten64, n: usize) {
    let total = t.shape[0];
    let keep = n.min(total);
    if keep == total {
        return;
    }
    let sample_size = t.data.len() / total.max(1);
    t.data.truncate(keep * sample_size);
    t.shape[0] = keep;
}

fn check_counts(images: usize, labels: usize) -> Result<(), Box<dyn Error>> {
    if images != labels {
        return Err(format!("{images} images but {labels} labels").into());
    }
    Ok(())
}

/// Reads a dataset file, transparently decompressing a sibling `.gz`, and
/// falling back to a download when a mirror URL is known.
fn read_or_fetch(path: &Path, url: Option<&str>) -> Result<Vec<u8>, Box<dyn Error>> {
    if path.exists() {
        return Ok(fs::read(path)?);
    }

    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);
    if gz_path.exists() {
        let mut buf = Vec::new();
        GzDecoder::new(File::open(&gz_path)?).read_to_end(&mut buf)?;
        return Ok(buf);
    }

    let Some(url) = url else {
        return Err(format!("missing dataset file {}", path.display()).into());
    };
    fetch(url, path)?;
    Ok(fs::read(path)?)
}

/// Downloads and gunzips a dataset file in one pass.
#[cfg(feature = "download")]
fn fetch(url: &str, path: &Path) -> Result<(), Box<dyn Error>> {
    log::info!("downloading {url}");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let resp = reqwest::blocking::get(url)?;
    if !resp.status().is_success() {
        return Err(format!("failed to download {url}: HTTP {}", resp.status()).into());
    }
    let mut decoder = GzDecoder::new(resp);
    let mut out = File::create(path)?;
    std::io::copy(&mut decoder, &mut out)?;
    Ok(())
}

#[cfg(not(feature = "download"))]
fn fetch(url: &str, path: &Path) -> Result<(), Box<dyn Error>> {
    Err(format!(
        "missing dataset file {} (fetch {url} and gunzip it there, or build with the `download` feature)",
        path.display()
    )
    .into())
}
