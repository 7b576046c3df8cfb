//! Error types for model loading and generation.
//!
//! Load-time and inference-time failures are distinct types so callers can
//! branch on the kind without inspecting messages. Nothing here is retried.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Failure to turn a model identifier into a resident pipeline.
///
/// The cache is left unchanged whenever one of these is returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid model identifier: {0:?}")]
    InvalidModelId(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("device placement on {device} failed: {reason}")]
    Placement { device: String, reason: String },

    #[error("out of device memory while placing weights: {0}")]
    OutOfMemory(String),

    #[error("diffusion backend not compiled in (rebuild with --features diffusion)")]
    BackendUnavailable,
}

/// Failure raised by a resident pipeline while producing an image.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("device fault: {0}")]
    Device(String),

    #[error("out of device memory during compute: {0}")]
    OutOfMemory(String),

    #[error("pipeline returned an empty image")]
    EmptyOutput,

    /// The pipeline can no longer be trusted and must not be handed out again.
    #[error("pipeline poisoned: {0}")]
    Poisoned(String),
}

impl InferenceError {
    pub fn is_poisoned(&self) -> bool {
        matches!(self, Self::Poisoned(_))
    }
}

/// Phase of a generation request in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    AcquiringModel,
    Invoking,
    Encoding,
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationPhase::AcquiringModel => write!(f, "acquiring_model"),
            GenerationPhase::Invoking => write!(f, "invoking"),
            GenerationPhase::Encoding => write!(f, "encoding"),
        }
    }
}

/// Tagged result of a generation request.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to load model '{model_id}': {source}")]
    Load {
        model_id: String,
        #[source]
        source: LoadError,
    },

    #[error("inference failed for model '{model_id}': {source}")]
    Inference {
        model_id: String,
        #[source]
        source: InferenceError,
    },

    #[error("internal error for model '{model_id}': {message}")]
    Internal { model_id: String, message: String },
}

impl GenerationError {
    pub fn phase(&self) -> GenerationPhase {
        match self {
            Self::Load { .. } => GenerationPhase::AcquiringModel,
            Self::Inference { .. } => GenerationPhase::Invoking,
            Self::Internal { .. } => GenerationPhase::Encoding,
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            Self::Load { model_id, .. }
            | Self::Inference { model_id, .. }
            | Self::Internal { model_id, .. } => model_id,
        }
    }
}
