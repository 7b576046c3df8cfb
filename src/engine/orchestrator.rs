//! Request-scoped generation: acquire a pipeline, run it, encode the image.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use serde::Serialize;

use super::error::{GenerationError, GenerationPhase, InferenceError};
use super::request::GenerationRequest;
use crate::models::{CacheOutcome, ModelCache};
use crate::telemetry::{self, RequestSpan, SpanExt};

/// A generated image, PNG-encoded then base64-encoded.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    pub image_base64: String,
    /// Echo of the request that produced the image.
    pub metadata: GenerationRequest,
    #[serde(skip)]
    pub cache: CacheOutcome,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Drives a single request through the cache and a resident pipeline.
///
/// Stateless apart from the shared cache; one instance serves all requests.
pub struct GenerationOrchestrator {
    cache: Arc<ModelCache>,
}

impl GenerationOrchestrator {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Generate one image. Blocking; run it off the async executor.
    ///
    /// The request must already be validated.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = RequestSpan::new(&request_id, &request.model_id);
        let _entered = span.enter();
        let started = Instant::now();

        let result = self.run(request, &span);

        let elapsed = started.elapsed();
        span.record("latency_ms", elapsed.as_millis() as u64);
        span.record_result(&result);
        match &result {
            Ok(_) => {
                telemetry::record_generation(elapsed, "ok");
                tracing::info!(latency_ms = elapsed.as_millis() as u64, "generation completed");
            }
            Err(e) => {
                let status = match e.phase() {
                    GenerationPhase::AcquiringModel => "acquiring_model",
                    GenerationPhase::Invoking => "invoking",
                    GenerationPhase::Encoding => "encoding",
                };
                telemetry::record_generation(elapsed, status);
                tracing::warn!(phase = %e.phase(), error = %e, "generation failed");
            }
        }

        result.map(|mut image| {
            image.elapsed = elapsed;
            image
        })
    }

    fn run(&self, request: &GenerationRequest, span: &tracing::Span) -> Result<GeneratedImage, GenerationError> {
        let model_id = request.model_id.as_str();

        span.record_phase(GenerationPhase::AcquiringModel);
        let acquired = self.cache.acquire_tracked(model_id).map_err(|source| GenerationError::Load {
            model_id: model_id.to_string(),
            source,
        })?;
        let cache = acquired.outcome;
        span.record("cache", tracing::field::debug(cache));

        span.record_phase(GenerationPhase::Invoking);
        let outcome = acquired.handle.generate(request).and_then(|img| {
            if img.width() == 0 || img.height() == 0 {
                Err(InferenceError::EmptyOutput)
            } else {
                Ok(img)
            }
        });
        let image = match outcome {
            Ok(img) => img,
            Err(source) => {
                if source.is_poisoned() && self.cache.invalidate(&acquired.handle) {
                    tracing::warn!(model_id, "evicted poisoned pipeline");
                }
                return Err(GenerationError::Inference { model_id: model_id.to_string(), source });
            }
        };
        drop(acquired);

        span.record_phase(GenerationPhase::Encoding);
        let image_base64 = encode_png_base64(&image).map_err(|message| GenerationError::Internal {
            model_id: model_id.to_string(),
            message,
        })?;

        Ok(GeneratedImage {
            image_base64,
            metadata: request.clone(),
            cache,
            elapsed: Duration::ZERO,
        })
    }
}

/// PNG-encode an image and base64 the bytes.
pub fn encode_png_base64(image: &RgbImage) -> Result<String, String> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| format!("png encoding failed: {e}"))?;
    if png.is_empty() {
        return Err("png encoding produced no bytes".to_string());
    }
    Ok(STANDARD.encode(png))
}
