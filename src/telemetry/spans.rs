//! Span utilities for request tracing.

use tracing::{info_span, Span};

use crate::engine::GenerationPhase;

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    fn record_phase(&self, phase: GenerationPhase);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_phase(&self, phase: GenerationPhase) {
        self.record("phase", tracing::field::display(phase));
    }
}

/// Factory for creating standardized request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Span for one generation request.
    ///
    /// `phase`, `cache`, `status`, `error.message` and `latency_ms` start
    /// empty and are filled in as the request progresses.
    pub fn new(request_id: &str, model_id: &str) -> Span {
        info_span!(
            "generation_request",
            request_id = %request_id,
            model_id = %model_id,
            phase = tracing::field::Empty,
            cache = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
