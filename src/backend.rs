//! Compute backend selection.
//!
//! This module defines the available computation backends and provides
//! functions to set and get the current backend.
//!
//! # Supported Backends
//!
//! - `Cpu` — Pure Rust backend using rayon-parallel CPU kernels (default).
//! - `Wgpu` — Reserved for GPU acceleration; this crate ships no GPU
//!   kernels, so selecting it falls back to `Cpu` at dispatch time.
//! - `Cuda` — Placeholder for future support (currently not functional).
//!
//! The backend is stored globally using an `AtomicU8`, enabling fast
//! switching at runtime. Moving work "to" a backend is a synchronous
//! operation with no cancellation semantics: the selection is read once per
//! kernel invocation.

use core::convert::TryFrom;
use core::str::FromStr;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported computation backends.
///
/// Only `Cpu` is implemented; the other variants exist so a run can request
/// an accelerator and degrade to the CPU path, mirroring a build without
/// accelerator kernels compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Pure CPU-based backend (default).
    #[default]
    Cpu = 0,
    /// Reserved for a `wgpu` accelerated backend.
    Wgpu,
    /// Placeholder for future CUDA support.
    Cuda,
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            2 => Ok(Self::Cuda),
            _ => Err(()),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    /// Parses a `--device` flag value. Unknown names are a configuration
    /// error, not a silent CPU fallback.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "wgpu" => Ok(Self::Wgpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(format!(
                "unknown device `{other}` (expected cpu, wgpu or cuda)"
            )),
        }
    }
}

/// Internal global state for the active backend.
///
/// Relaxed ordering would likely suffice since the backend changes rarely
/// and never mid-kernel, but acquire/release keeps the intent obvious.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the active backend to use for tensor computation.
///
/// # Example
///
/// ```
/// use smallnet::backend::{set_backend, Backend};
/// set_backend(Backend::Cpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently active computation backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}
