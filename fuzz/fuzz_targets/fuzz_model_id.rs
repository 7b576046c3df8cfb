//! Fuzz target for Hub repository id validation.

#![no_main]

use diffusion_studio::engine::diffusion::validate_model_id;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(id) = std::str::from_utf8(data) {
        if validate_model_id(id).is_ok() {
            assert!(!id.contains(".."));
            assert!(!id.starts_with('/') && !id.ends_with('/'));
        }
    }
});
