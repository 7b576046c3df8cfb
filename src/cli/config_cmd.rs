// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables
//! without contacting a running server.

use crate::config::{self, EffectiveConfig, DEFAULT_BIND_ADDR};
use crate::engine::diffusion::DEFAULT_TOKENIZER_REPO;

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load().effective_config();
    print_config(&cfg);
}

/// Print the documented defaults (no env overrides) to stdout.
pub fn run_defaults() {
    println!("STUDIO_BIND_ADDR={}", DEFAULT_BIND_ADDR);
    println!("STUDIO_CACHE_SIZE=1");
    println!("STUDIO_DEVICE=auto");
    println!("STUDIO_DEVICE_INDEX=0");
    println!("STUDIO_HALF_PRECISION=true");
    println!("STUDIO_SLICED_ATTENTION=0");
    println!("STUDIO_TOKENIZER_REPO={}", DEFAULT_TOKENIZER_REPO);
    println!("STUDIO_CATALOG_URL=https://huggingface.co");
    println!("STUDIO_CATALOG_TIMEOUT=10");
    println!("STUDIO_SHUTDOWN_TIMEOUT=30");
    println!("STUDIO_REQUIRE_MODEL_LOADED=false");
    println!("STUDIO_MAX_IN_FLIGHT=64");
    println!("STUDIO_LOG_FORMAT=json");
    println!("STUDIO_LOG_LEVEL=info");
    println!("STUDIO_LOG_FILE=");
}

/// Returns 0 if every set variable is usable, 1 otherwise.
pub fn run_validate() -> i32 {
    let problems = config::validate();
    for p in &problems {
        eprintln!("WARNING: {}", p);
    }
    if problems.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("STUDIO_BIND_ADDR={}", cfg.bind_addr);
    println!("STUDIO_CACHE_SIZE={}", cfg.cache_size);
    println!("STUDIO_DEVICE={}", cfg.device);
    println!("STUDIO_DEVICE_INDEX={}", cfg.device_index);
    println!("STUDIO_HALF_PRECISION={}", cfg.half_precision);
    println!("STUDIO_SLICED_ATTENTION={}", cfg.sliced_attention);
    println!("STUDIO_TOKENIZER_REPO={}", cfg.tokenizer_repo);
    println!("STUDIO_CATALOG_URL={}", cfg.catalog_url);
    println!("STUDIO_CATALOG_TIMEOUT={}", cfg.catalog_timeout_secs);
    println!("STUDIO_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("STUDIO_REQUIRE_MODEL_LOADED={}", cfg.require_model_loaded);
    println!("STUDIO_MAX_IN_FLIGHT={}", cfg.max_in_flight);
    println!("STUDIO_LOG_FORMAT={}", cfg.log_format);
    println!("STUDIO_LOG_LEVEL={}", cfg.log_level);
    println!("STUDIO_LOG_FILE={}", cfg.log_file.as_deref().unwrap_or(""));
}
