// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stable Diffusion backend using Candle.
//!
//! Weights are fetched from the Hugging Face Hub in the diffusers layout
//! (`unet/`, `vae/`, `text_encoder/`). Without the `diffusion` feature every
//! load fails with [`LoadError::BackendUnavailable`].

#[cfg(feature = "diffusion")]
mod sd;

use super::device::DeviceSpec;
use super::error::{InferenceError, LoadError};
use super::pipeline::{Pipeline, PipelineLoader};
use super::request::GenerationRequest;

/// Default repository for the CLIP tokenizer.
pub const DEFAULT_TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";

/// Longest accepted model identifier.
const MAX_MODEL_ID_LEN: usize = 256;

/// Pixels per latent cell along each axis.
pub const LATENT_SCALE: u32 = 8;

/// Stable Diffusion generation of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdVersion {
    V1_5,
    V2_1,
}

#[derive(Debug, Clone)]
pub struct DiffusionConfig {
    /// Hub repository holding `tokenizer.json` for the CLIP text encoder.
    pub tokenizer_repo: String,
    /// Attention slice size; `None` disables slicing.
    pub sliced_attention: Option<usize>,
    /// Use f16 weights on accelerators.
    pub half_precision: bool,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            tokenizer_repo: DEFAULT_TOKENIZER_REPO.to_string(),
            sliced_attention: None,
            half_precision: true,
        }
    }
}

/// Loads diffusers-layout checkpoints from the Hub.
pub struct DiffusionLoader {
    config: DiffusionConfig,
}

impl DiffusionLoader {
    pub fn new(config: DiffusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffusionConfig {
        &self.config
    }
}

impl PipelineLoader for DiffusionLoader {
    fn load(&self, model_id: &str, device: &DeviceSpec) -> Result<Box<dyn Pipeline>, LoadError> {
        validate_model_id(model_id)?;
        load_pipeline(&self.config, model_id, device)
    }
}

#[cfg(feature = "diffusion")]
fn load_pipeline(
    config: &DiffusionConfig,
    model_id: &str,
    device: &DeviceSpec,
) -> Result<Box<dyn Pipeline>, LoadError> {
    let pipeline = sd::StableDiffusionPipeline::load(config, model_id, device)?;
    Ok(Box::new(pipeline))
}

#[cfg(not(feature = "diffusion"))]
fn load_pipeline(
    _config: &DiffusionConfig,
    model_id: &str,
    device: &DeviceSpec,
) -> Result<Box<dyn Pipeline>, LoadError> {
    tracing::debug!(model_id, device = %device, "diffusion backend not compiled in");
    Err(LoadError::BackendUnavailable)
}

/// Create the process-wide compute device. Loads and reclamation passes
/// share it; a later call with a different device fails.
#[cfg(feature = "diffusion")]
pub fn init_device(device: &DeviceSpec) -> Result<(), LoadError> {
    sd::shared_device(device).map(|_| ())
}

#[cfg(not(feature = "diffusion"))]
pub fn init_device(_device: &DeviceSpec) -> Result<(), LoadError> {
    Ok(())
}

/// Flush the shared device queue so freed buffers return to the driver.
/// A no-op until the device has been created.
#[cfg(feature = "diffusion")]
pub fn release_device_memory(device: &DeviceSpec) -> Result<(), String> {
    sd::synchronize(device).map_err(|e| e.to_string())
}

/// No device buffers exist without the backend.
#[cfg(not(feature = "diffusion"))]
pub fn release_device_memory(_device: &DeviceSpec) -> Result<(), String> {
    Ok(())
}

/// Height and width must map onto whole latent cells.
pub fn check_dimensions(request: &GenerationRequest) -> Result<(), InferenceError> {
    if request.height % LATENT_SCALE != 0 || request.width % LATENT_SCALE != 0 {
        return Err(InferenceError::InvalidParams(format!(
            "height and width must be divisible by {LATENT_SCALE}, got {}x{}",
            request.height, request.width
        )));
    }
    Ok(())
}

/// Detect the architecture from the `unet/config.json` of a checkpoint.
///
/// The UNet cross-attention width follows the text encoder: 768 for 1.x,
/// 1024 for 2.x. Anything else (SDXL uses 2048) is rejected.
pub fn detect_version(unet_config: &str) -> Result<SdVersion, LoadError> {
    let config: serde_json::Value = serde_json::from_str(unet_config)
        .map_err(|e| LoadError::UnsupportedFormat(format!("unet/config.json: {e}")))?;
    match config.get("cross_attention_dim").and_then(serde_json::Value::as_u64) {
        Some(768) => Ok(SdVersion::V1_5),
        Some(1024) => Ok(SdVersion::V2_1),
        Some(dim) => Err(LoadError::UnsupportedFormat(format!(
            "cross_attention_dim {dim} is neither Stable Diffusion 1.x nor 2.x"
        ))),
        None => Err(LoadError::UnsupportedFormat(
            "unet/config.json has no integer cross_attention_dim".to_string(),
        )),
    }
}

/// Hub repository ids: `name` or `owner/name`, ASCII alphanumerics plus
/// `-`, `_` and `.`.
pub fn validate_model_id(model_id: &str) -> Result<(), LoadError> {
    let invalid = || LoadError::InvalidModelId(model_id.to_string());

    if model_id.is_empty() || model_id.len() > MAX_MODEL_ID_LEN {
        return Err(invalid());
    }
    let parts: Vec<&str> = model_id.split('/').collect();
    if parts.len() > 2 {
        return Err(invalid());
    }
    for part in parts {
        let allowed = part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if part.is_empty() || !allowed || part.starts_with('.') || part.contains("..") {
            return Err(invalid());
        }
    }
    Ok(())
}
