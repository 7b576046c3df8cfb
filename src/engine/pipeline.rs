//! Pipeline and loader capabilities, and the resident model handle.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use super::device::DeviceSpec;
use super::error::{InferenceError, LoadError};
use super::request::GenerationRequest;

/// A loaded, device-resident text-to-image pipeline.
///
/// `generate` is blocking and may run for a long time. Implementations must
/// be safe to call from several threads at once.
pub trait Pipeline: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<RgbImage, InferenceError>;

    /// Approximate bytes held on the device, if known.
    fn memory_bytes(&self) -> Option<u64> {
        None
    }
}

/// Turns a model identifier into a ready-to-use pipeline on a device.
pub trait PipelineLoader: Send + Sync {
    fn load(&self, model_id: &str, device: &DeviceSpec) -> Result<Box<dyn Pipeline>, LoadError>;
}

struct HandleInner {
    model_id: String,
    device: DeviceSpec,
    loaded_at: Instant,
    pipeline: Box<dyn Pipeline>,
}

/// Shared handle to a resident pipeline.
///
/// Identifier and device never change after construction. Cloning is cheap;
/// the pipeline is dropped, and its memory released, with the last clone.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<HandleInner>,
}

impl ModelHandle {
    pub fn new(model_id: impl Into<String>, device: DeviceSpec, pipeline: Box<dyn Pipeline>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                model_id: model_id.into(),
                device,
                loaded_at: Instant::now(),
                pipeline,
            }),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.inner.model_id
    }

    pub fn device(&self) -> DeviceSpec {
        self.inner.device
    }

    pub fn loaded_at(&self) -> Instant {
        self.inner.loaded_at
    }

    pub fn memory_bytes(&self) -> Option<u64> {
        self.inner.pipeline.memory_bytes()
    }

    /// Run the pipeline. Blocking.
    pub fn generate(&self, request: &GenerationRequest) -> Result<RgbImage, InferenceError> {
        self.inner.pipeline.generate(request)
    }

    /// True if both handles refer to the same loaded pipeline instance.
    pub fn same_instance(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live clones, including the cache's own.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.inner.model_id)
            .field("device", &self.inner.device)
            .finish_non_exhaustive()
    }
}
