//! Fuzz target for generation request parsing and validation.
//!
//! Arbitrary bytes must either fail to parse or produce a request whose
//! validation returns without panicking.

#![no_main]

use diffusion_studio::engine::GenerationRequest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = serde_json::from_slice::<GenerationRequest>(data) {
        let _ = request.validate();
    }
});
