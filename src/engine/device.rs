// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! Device selection.
//!
//! The device is resolved exactly once at startup from [`DeviceConfig`] and
//! then passed by value to every component that needs it. Nothing reads the
//! device from ambient process state afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Compute backend a pipeline is resident on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// NVIDIA CUDA backend
    Cuda,
    /// Apple Metal backend (macOS only)
    Metal,
    /// CPU fallback (no accelerator)
    Cpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cuda => write!(f, "cuda"),
            DeviceKind::Metal => write!(f, "metal"),
            DeviceKind::Cpu => write!(f, "cpu"),
        }
    }
}

/// A concrete device: backend plus ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub index: usize,
}

impl DeviceSpec {
    pub fn cpu() -> Self {
        Self { kind: DeviceKind::Cpu, index: 0 }
    }

    pub fn cuda(index: usize) -> Self {
        Self { kind: DeviceKind::Cuda, index }
    }

    pub fn metal(index: usize) -> Self {
        Self { kind: DeviceKind::Metal, index }
    }

    /// True for anything that owns a dedicated memory pool.
    pub fn is_accelerator(&self) -> bool {
        self.kind != DeviceKind::Cpu
    }
}

impl Default for DeviceSpec {
    fn default() -> Self {
        Self::cpu()
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu"),
            kind => write!(f, "{}:{}", kind, self.index),
        }
    }
}

/// Which device the operator asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePreference {
    /// First available accelerator, else CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" | "mps" => Ok(Self::Metal),
            other => Err(format!("unknown device preference: {other}")),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda => write!(f, "cuda"),
            DevicePreference::Metal => write!(f, "metal"),
        }
    }
}

/// Device configuration, resolved once via [`select_device`].
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub preference: DevicePreference,
    pub index: usize,
    /// Load weights in f16 when the selected device is an accelerator.
    pub half_precision: bool,
}

/// Resolve the process-wide device.
///
/// An explicit accelerator preference that cannot be satisfied falls back to
/// the CPU with a warning rather than refusing to start.
pub fn select_device(config: &DeviceConfig) -> DeviceSpec {
    select_with(config, accelerator_available)
}

fn select_with(config: &DeviceConfig, available: impl Fn(DeviceKind) -> bool) -> DeviceSpec {
    let candidates: &[DeviceKind] = match config.preference {
        DevicePreference::Cpu => &[],
        DevicePreference::Cuda => &[DeviceKind::Cuda],
        DevicePreference::Metal => &[DeviceKind::Metal],
        DevicePreference::Auto => &[DeviceKind::Cuda, DeviceKind::Metal],
    };

    for kind in candidates {
        if available(*kind) {
            return DeviceSpec { kind: *kind, index: config.index };
        }
    }

    if matches!(config.preference, DevicePreference::Cuda | DevicePreference::Metal) {
        tracing::warn!(
            preference = %config.preference,
            "requested accelerator not available, falling back to cpu"
        );
    }
    DeviceSpec::cpu()
}

#[cfg(feature = "diffusion")]
fn accelerator_available(kind: DeviceKind) -> bool {
    match kind {
        DeviceKind::Cuda => candle_core::utils::cuda_is_available(),
        DeviceKind::Metal => candle_core::utils::metal_is_available(),
        DeviceKind::Cpu => true,
    }
}

#[cfg(not(feature = "diffusion"))]
fn accelerator_available(kind: DeviceKind) -> bool {
    kind == DeviceKind::Cpu
}
