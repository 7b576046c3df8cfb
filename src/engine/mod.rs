//! Generation engine.
//!
//! Request validation, device selection, the pipeline and loader
//! capabilities, the Stable Diffusion backend and the per-request
//! orchestrator.

pub mod device;
pub mod diffusion;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod reclaim;
pub mod request;

pub use device::{select_device, DeviceConfig, DeviceKind, DevicePreference, DeviceSpec};
pub use diffusion::{DiffusionConfig, DiffusionLoader};
pub use error::{GenerationError, GenerationPhase, InferenceError, LoadError};
pub use orchestrator::{encode_png_base64, GeneratedImage, GenerationOrchestrator};
pub use pipeline::{ModelHandle, Pipeline, PipelineLoader};
pub use reclaim::{DeviceMemoryReclaimer, DeviceReclaimer};
pub use request::{GenerationRequest, ValidationError};
