//! Saving and loading of model weights.
//!
//! # `.bpat` Snapshot Format
//!
//! A snapshot stores the model's named parameter tensors in a compact binary
//! layout:
//!
//! ```text
//! ┌────────────┬──────────────────────────────────┐
//! │ Header     │ Tensor N, Tensor N+1, …          │
//! ├────────────┼──────────────────────────────────┤
//! │ "bpat"[4]  │ u16: name length                 │
//! │ u8: count  │ [u8; len] UTF-8 name             │
//! │            │ u64: ndim                        │
//! │            │ [u64; ndim] shape                │
//! │            │ [f64; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. The per-tensor name is the
//! layer identifier (e.g. `l1.weight`), making the file the serialized
//! layer-to-tensor mapping rather than a bare tensor list.
//!
//! # Snapshot Paths
//!
//! [`snapshot_path`] derives the artifact location from a model's canonical
//! name: `<base_dir>/<name>/<name>_weights.bpat`. Identical configurations
//! therefore share one deterministic path; nothing guards two concurrent
//! runs of the same configuration against racing on it.
//!
//! # Design Principles
//! - Deterministic, reproducible serialization
//! - Decoded tensors pass `briny` validation before they are trusted
//! - Maximum 255 tensors per file (u8 count), far beyond the three-layer
//!   models stored here

use std::error::Error;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use briny::prelude::*;

use crate::tensors::{Ten64, Tensor};

const BPAT_MAGIC: &[u8; 4] = b"bpat";

/// Internal representation of a packed tensor.
struct PackedTensor {
    shape: Vec<u64>,
    data: Vec<f64>,
}

impl Validate for PackedTensor {
    fn validate(&self) -> Result<(), ValidationError> {
        let expected = self.shape.iter().product::<u64>() as usize;
        if self.data.len() != expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Builds the deterministic snapshot location for a canonical model name:
/// `<base_dir>/<name>/<name>_weights.bpat`.
pub fn snapshot_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(name).join(format!("{name}_weights.bpat"))
}

/// Saves named tensors to a `.bpat` file, creating intermediate directories
/// as needed.
///
/// # Errors
/// - Returns an error if file I/O fails or more than 255 tensors are given.
pub fn save_weights(path: &Path, tensors: &[(String, &Ten64)]) -> Result<(), Box<dyn Error>> {
    if tensors.len() > u8::MAX as usize {
        return Err("too many tensors for one snapshot".into());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);

    file.write_all(BPAT_MAGIC)?;
    file.write_all(&[tensors.len() as u8])?;

    for (name, tensor) in tensors {
        assert_eq!(
            tensor.data.len(),
            tensor.shape.iter().product(),
            "tensor shape/data mismatch"
        );

        let name_bytes = name.as_bytes();
        file.write_all(&(name_bytes.len() as u16).to_le_bytes())?;
        file.write_all(name_bytes)?;

        let dims = tensor.shape.len() as u64;
        file.write_all(&dims.to_le_bytes())?;

        for &dim in &tensor.shape {
            file.write_all(&(dim as u64).to_le_bytes())?;
        }

        for &val in &tensor.data {
            file.write_all(&val.to_le_bytes())?;
        }
    }

    Ok(())
}

/// Loads a `.bpat` file containing named tensors.
///
/// # Errors
/// - Fails if the file is absent, does not start with the `bpat` magic, is
///   truncated, or contains a tensor whose data does not match its shape.
pub fn load_weights(path: &Path) -> Result<Vec<(String, Ten64)>, Box<dyn Error>> {
    let mut file = BufReader::new(File::open(path)?);
    let mut buf8 = [0u8; 8];

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != BPAT_MAGIC {
        return Err("invalid magic header".into());
    }

    let mut count = [0u8; 1];
    file.read_exact(&mut count)?;
    let count = count[0] as usize;

    let mut tensors = Vec::with_capacity(count);

    for _ in 0..count {
        let mut buf2 = [0u8; 2];
        file.read_exact(&mut buf2)?;
        let name_len = u16::from_le_bytes(buf2) as usize;
        let mut name_bytes = vec![0u8; name_len];
        file.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes)?;

        file.read_exact(&mut buf8)?;
        let ndim = u64::from_le_bytes(buf8) as usize;

        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            file.read_exact(&mut buf8)?;
            shape.push(u64::from_le_bytes(buf8));
        }

        let size: usize = shape.iter().product::<u64>() as usize;
        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            file.read_exact(&mut buf8)?;
            data.push(f64::from_le_bytes(buf8));
        }

        let raw_tensor = PackedTensor { shape, data };
        let trusted = TrustedData::new(raw_tensor)?;
        let inner = trusted.into_inner();
        let shape_usize: Vec<usize> = inner.shape.iter().map(|&x| x as usize).collect();
        tensors.push((name, Tensor::new(shape_usize, inner.data)));
    }

    Ok(tensors)
}
