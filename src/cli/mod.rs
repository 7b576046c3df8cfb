// Copyright 2026 Diffusion Studio Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands.
//!
//! ```bash
//! diffusion-studio                  # serve (default)
//! diffusion-studio search "anime"   # query the model catalog
//! diffusion-studio health           # check a running server
//! diffusion-studio models           # list resident models on a running server
//! diffusion-studio config show      # print effective configuration
//! ```

pub mod client;
pub mod config_cmd;
pub mod health;
pub mod models_cmd;
pub mod search_cmd;

pub use client::{CliError, StudioClient};
pub use health::{run_health, run_liveness, run_readiness};

/// Default server address for client subcommands.
pub const DEFAULT_SERVER_ADDR: &str = "http://127.0.0.1:8000";

/// Server address from `STUDIO_SERVER_ADDR` or the default.
pub fn get_server_addr() -> String {
    std::env::var("STUDIO_SERVER_ADDR").unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string())
}

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}
