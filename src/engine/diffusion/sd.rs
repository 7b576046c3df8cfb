// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stable Diffusion 1.x pipeline on Candle.

use std::path::PathBuf;
use std::sync::OnceLock;

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::sync::{Api, ApiRepo};
use image::RgbImage;
use tokenizers::Tokenizer;

use super::{check_dimensions, detect_version, DiffusionConfig, SdVersion, LATENT_SCALE};
use crate::engine::device::{DeviceKind, DeviceSpec};
use crate::engine::error::{InferenceError, LoadError};
use crate::engine::pipeline::Pipeline;
use crate::engine::request::GenerationRequest;

const VAE_SCALE: f64 = 0.18215;
const LATENT_CHANNELS: usize = 4;
const END_OF_TEXT: &str = "<|endoftext|>";

/// The one candle device of the process and the spec it was created for.
static DEVICE: OnceLock<(DeviceSpec, Device)> = OnceLock::new();

fn to_candle_device(spec: &DeviceSpec) -> candle_core::Result<Device> {
    match spec.kind {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Cuda => Device::new_cuda(spec.index),
        DeviceKind::Metal => Device::new_metal(spec.index),
    }
}

fn bound_device(
    bound: &DeviceSpec,
    device: &Device,
    spec: &DeviceSpec,
) -> Result<Device, LoadError> {
    if bound == spec {
        Ok(device.clone())
    } else {
        Err(LoadError::Placement {
            device: spec.to_string(),
            reason: format!("process device is already {bound}"),
        })
    }
}

/// Device for `spec`, created on first use and shared by every pipeline and
/// reclamation pass afterwards.
pub(super) fn shared_device(spec: &DeviceSpec) -> Result<Device, LoadError> {
    if let Some((bound, device)) = DEVICE.get() {
        return bound_device(bound, device, spec);
    }
    let created = to_candle_device(spec).map_err(|e| placement_error(spec, e))?;
    let (bound, device) = DEVICE.get_or_init(|| (*spec, created));
    bound_device(bound, device, spec)
}

/// Flush the queue of the shared device. Nothing to flush before the device
/// exists or for a spec that was never placed on.
pub(super) fn synchronize(spec: &DeviceSpec) -> candle_core::Result<()> {
    match DEVICE.get() {
        Some((bound, device)) if bound == spec => device.synchronize(),
        _ => Ok(()),
    }
}

fn sd_config(
    version: SdVersion,
    sliced_attention: Option<usize>,
    height: Option<usize>,
    width: Option<usize>,
) -> StableDiffusionConfig {
    match version {
        SdVersion::V1_5 => StableDiffusionConfig::v1_5(sliced_attention, height, width),
        SdVersion::V2_1 => StableDiffusionConfig::v2_1(sliced_attention, height, width),
    }
}

fn is_oom(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory") || lower.contains("out_of_memory")
}

fn placement_error(spec: &DeviceSpec, err: candle_core::Error) -> LoadError {
    let message = err.to_string();
    if is_oom(&message) {
        LoadError::OutOfMemory(message)
    } else {
        LoadError::Placement { device: spec.to_string(), reason: message }
    }
}

fn inference_error(err: candle_core::Error) -> InferenceError {
    let message = err.to_string();
    if is_oom(&message) {
        InferenceError::OutOfMemory(message)
    } else {
        InferenceError::Device(message)
    }
}

/// Weight files resolved from a repository listing.
struct WeightFiles {
    version: SdVersion,
    unet: PathBuf,
    vae: PathBuf,
    clip: PathBuf,
}

fn pick(siblings: &[String], stem: &str, half: bool) -> Option<String> {
    let full = format!("{stem}.safetensors");
    let fp16 = format!("{stem}.fp16.safetensors");
    let has = |name: &str| siblings.iter().any(|s| s == name);
    if half && has(&fp16) {
        Some(fp16)
    } else if has(&full) {
        Some(full)
    } else if has(&fp16) {
        Some(fp16)
    } else {
        None
    }
}

fn fetch(repo: &ApiRepo, file: &str) -> Result<PathBuf, LoadError> {
    repo.get(file).map_err(|e| LoadError::Fetch(format!("{file}: {e}")))
}

fn fetch_weights(api: &Api, model_id: &str, half: bool) -> Result<WeightFiles, LoadError> {
    let repo = api.model(model_id.to_string());
    let info = repo
        .info()
        .map_err(|e| LoadError::Fetch(format!("{model_id}: {e}")))?;
    let siblings: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();

    let resolve = |stem: &str| {
        pick(&siblings, stem, half).ok_or_else(|| {
            LoadError::UnsupportedFormat(format!("{model_id} has no {stem}.safetensors"))
        })
    };
    let unet_config = fetch(&repo, "unet/config.json")?;
    let unet_config = std::fs::read_to_string(&unet_config)
        .map_err(|e| LoadError::Fetch(format!("{model_id}: unet/config.json: {e}")))?;
    let version = detect_version(&unet_config)?;

    let unet = resolve("unet/diffusion_pytorch_model")?;
    let vae = resolve("vae/diffusion_pytorch_model")?;
    let clip = resolve("text_encoder/model")?;

    Ok(WeightFiles {
        version,
        unet: fetch(&repo, &unet)?,
        vae: fetch(&repo, &vae)?,
        clip: fetch(&repo, &clip)?,
    })
}

pub(super) struct StableDiffusionPipeline {
    device: Device,
    dtype: DType,
    version: SdVersion,
    sliced_attention: Option<usize>,
    clip_config: stable_diffusion::clip::Config,
    tokenizer: Tokenizer,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    weight_bytes: u64,
}

impl StableDiffusionPipeline {
    pub(super) fn load(
        config: &DiffusionConfig,
        model_id: &str,
        spec: &DeviceSpec,
    ) -> Result<Self, LoadError> {
        let device = shared_device(spec)?;
        let dtype = if config.half_precision && spec.is_accelerator() {
            DType::F16
        } else {
            DType::F32
        };

        let api = Api::new().map_err(|e| LoadError::Fetch(e.to_string()))?;
        let weights = fetch_weights(&api, model_id, dtype == DType::F16)?;
        let tokenizer_file = fetch(&api.model(config.tokenizer_repo.clone()), "tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(|e| LoadError::UnsupportedFormat(format!("tokenizer: {e}")))?;

        let sd_config = sd_config(weights.version, config.sliced_attention, None, None);

        // The text encoder stays in f32; it is small and unstable in f16.
        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &weights.clip,
            &device,
            DType::F32,
        )
        .map_err(|e| placement_error(spec, e))?;
        let vae = sd_config
            .build_vae(&weights.vae, &device, dtype)
            .map_err(|e| placement_error(spec, e))?;
        let unet = sd_config
            .build_unet(&weights.unet, &device, LATENT_CHANNELS, false, dtype)
            .map_err(|e| placement_error(spec, e))?;

        let weight_bytes = [&weights.unet, &weights.vae, &weights.clip]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        tracing::info!(
            model_id,
            device = %spec,
            dtype = ?dtype,
            version = ?weights.version,
            weight_bytes,
            "stable diffusion pipeline placed"
        );

        Ok(Self {
            device,
            dtype,
            version: weights.version,
            sliced_attention: config.sliced_attention,
            clip_config: sd_config.clip,
            tokenizer,
            text_model,
            unet,
            vae,
            weight_bytes,
        })
    }

    fn embed(&self, text: &str) -> Result<Tensor, InferenceError> {
        let max_len = self.clip_config.max_position_embeddings;
        let vocab = self.tokenizer.get_vocab(true);
        let pad = self.clip_config.pad_with.as_deref().unwrap_or(END_OF_TEXT);
        let pad_id = *vocab
            .get(pad)
            .ok_or_else(|| InferenceError::InvalidParams(format!("tokenizer lacks {pad}")))?;

        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| InferenceError::InvalidParams(format!("tokenize: {e}")))?
            .get_ids()
            .to_vec();
        tokens.truncate(max_len);
        tokens.resize(max_len, pad_id);

        let tokens = Tensor::new(tokens.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(inference_error)?;
        self.text_model.forward(&tokens).map_err(inference_error)
    }

    fn run(&self, request: &GenerationRequest) -> candle_core::Result<Tensor> {
        let height = request.height as usize;
        let width = request.width as usize;
        let scale = LATENT_SCALE as usize;
        let sd_config = sd_config(self.version, self.sliced_attention, Some(height), Some(width));
        let mut scheduler = sd_config.build_scheduler(request.num_steps as usize)?;

        let cond = self.embed(&request.prompt).map_err(candle_core::Error::wrap)?;
        let uncond = self
            .embed(request.negative_prompt())
            .map_err(candle_core::Error::wrap)?;
        let text_embeddings = Tensor::cat(&[uncond, cond], 0)?.to_dtype(self.dtype)?;

        let latents = Tensor::randn(
            0f32,
            1f32,
            (1, LATENT_CHANNELS, height / scale, width / scale),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        for timestep in timesteps {
            let input = Tensor::cat(&[&latents, &latents], 0)?;
            let input = scheduler.scale_model_input(input, timestep)?;
            let noise = self.unet.forward(&input, timestep as f64, &text_embeddings)?;
            let noise = noise.chunk(2, 0)?;
            let (uncond, cond) = (&noise[0], &noise[1]);
            let guided = (uncond + ((cond - uncond)? * request.guidance_scale)?)?;
            latents = scheduler.step(&guided, timestep, &latents)?;
        }

        let finite = latents
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?
            .is_finite();
        if !finite {
            return Err(candle_core::Error::Msg(NON_FINITE.to_string()));
        }

        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let decoded = ((decoded.to_dtype(DType::F32)? / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        (decoded.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?.i(0)
    }
}

const NON_FINITE: &str = "non-finite latents";

impl Pipeline for StableDiffusionPipeline {
    fn generate(&self, request: &GenerationRequest) -> Result<RgbImage, InferenceError> {
        check_dimensions(request)?;
        let pixels = self.run(request).map_err(|e| {
            let message = e.to_string();
            if message.contains(NON_FINITE) {
                InferenceError::Poisoned(message)
            } else {
                inference_error(e)
            }
        })?;

        let (channels, height, width) = pixels.dims3().map_err(inference_error)?;
        if channels != 3 || height == 0 || width == 0 {
            return Err(InferenceError::EmptyOutput);
        }
        let raw = pixels
            .permute((1, 2, 0))
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<u8>())
            .map_err(inference_error)?;
        RgbImage::from_raw(width as u32, height as u32, raw).ok_or(InferenceError::EmptyOutput)
    }

    fn memory_bytes(&self) -> Option<u64> {
        Some(self.weight_bytes)
    }
}
