// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! Device memory reclamation.

use std::sync::atomic::{AtomicU64, Ordering};

use super::device::DeviceSpec;

/// Forces release of device memory that is held but no longer referenced.
///
/// Must be idempotent: calling it with nothing to release is a no-op.
pub trait DeviceMemoryReclaimer: Send + Sync {
    fn reclaim(&self);
}

/// Reclaimer for the process-wide device.
///
/// Unreferenced host objects are freed on drop, so the host side has nothing
/// to collect. On an accelerator the device queue is flushed so that buffers
/// freed by dropped pipelines are returned to the driver before the next
/// allocation burst.
pub struct DeviceReclaimer {
    device: DeviceSpec,
    passes: AtomicU64,
}

impl DeviceReclaimer {
    pub fn new(device: DeviceSpec) -> Self {
        Self { device, passes: AtomicU64::new(0) }
    }

    /// Number of completed reclamation passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

impl DeviceMemoryReclaimer for DeviceReclaimer {
    fn reclaim(&self) {
        if self.device.is_accelerator() {
            if let Err(e) = super::diffusion::release_device_memory(&self.device) {
                tracing::warn!(device = %self.device, error = %e, "device memory release failed");
            }
        }
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        crate::telemetry::record_reclaim();
        tracing::debug!(device = %self.device, pass, "device memory reclaimed");
    }
}
