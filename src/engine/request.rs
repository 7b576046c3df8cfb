//! Generation request type and boundary validation.
//!
//! Requests are validated once when they enter the process. Out-of-range
//! values are rejected, not clamped. Everything past the boundary trusts the
//! request.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive bounds for height and width, in pixels.
pub const MIN_DIMENSION: u32 = 128;
pub const MAX_DIMENSION: u32 = 1024;

/// Inclusive bounds for the number of denoising steps.
pub const MIN_STEPS: u32 = 10;
pub const MAX_STEPS: u32 = 100;

/// Inclusive bounds for the classifier-free guidance scale.
pub const MIN_GUIDANCE: f64 = 1.0;
pub const MAX_GUIDANCE: f64 = 20.0;

/// Maximum prompt size in bytes (applies to both prompts).
pub const MAX_PROMPT_BYTES: usize = 16_384;

pub const DEFAULT_DIMENSION: u32 = 512;
pub const DEFAULT_STEPS: u32 = 25;
pub const DEFAULT_GUIDANCE: f64 = 7.5;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{field} exceeds maximum size: {len} > {max} bytes")]
    TooLong { field: &'static str, len: usize, max: usize },

    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: String,
        max: String,
        value: String,
    },
}

/// A text-to-image request. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model_id: String,
    pub prompt: String,
    #[serde(default = "default_negative_prompt")]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_steps")]
    pub num_steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance_scale: f64,
}

fn default_negative_prompt() -> Option<String> {
    Some(String::new())
}

fn default_dimension() -> u32 {
    DEFAULT_DIMENSION
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_guidance() -> f64 {
    DEFAULT_GUIDANCE
}

impl GenerationRequest {
    /// A request with every optional field at its default.
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            negative_prompt: default_negative_prompt(),
            height: DEFAULT_DIMENSION,
            width: DEFAULT_DIMENSION,
            num_steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
        }
    }

    /// Negative prompt with `None` treated as empty.
    pub fn negative_prompt(&self) -> &str {
        self.negative_prompt.as_deref().unwrap_or("")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model_id.trim().is_empty() {
            return Err(ValidationError::Empty("model_id"));
        }
        check_len("prompt", &self.prompt)?;
        check_len("negative_prompt", self.negative_prompt())?;
        check_range("height", self.height, MIN_DIMENSION, MAX_DIMENSION)?;
        check_range("width", self.width, MIN_DIMENSION, MAX_DIMENSION)?;
        check_range("num_steps", self.num_steps, MIN_STEPS, MAX_STEPS)?;

        // NaN fails both comparisons and is rejected here too.
        let g = self.guidance_scale;
        if !(MIN_GUIDANCE..=MAX_GUIDANCE).contains(&g) {
            return Err(ValidationError::OutOfRange {
                field: "guidance_scale",
                min: MIN_GUIDANCE.to_string(),
                max: MAX_GUIDANCE.to_string(),
                value: g.to_string(),
            });
        }
        Ok(())
    }
}

fn check_len(field: &'static str, text: &str) -> Result<(), ValidationError> {
    if text.len() > MAX_PROMPT_BYTES {
        return Err(ValidationError::TooLong { field, len: text.len(), max: MAX_PROMPT_BYTES });
    }
    Ok(())
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            min: min.to_string(),
            max: max.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}
