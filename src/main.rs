//! Diffusion Studio entry point.
//!
//! ## CLI Subcommands
//!
//! - `diffusion-studio` or `diffusion-studio serve` - Run the HTTP server (default)
//! - `diffusion-studio search <QUERY>` - Search the model catalog
//! - `diffusion-studio health` - Full health check of a running server (exit 0/1)
//! - `diffusion-studio models` - List resident models on a running server
//! - `diffusion-studio config` - Show or validate configuration

use std::process::ExitCode;

use diffusion_studio::cli::{self, flag_value, get_server_addr};
use diffusion_studio::config;
use diffusion_studio::models::DEFAULT_SEARCH_LIMIT;
use diffusion_studio::shutdown::ShutdownResult;
use diffusion_studio::telemetry;
use diffusion_studio::Studio;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");
    let addr = || {
        flag_value(&args, "--addr")
            .map(str::to_string)
            .unwrap_or_else(get_server_addr)
    };

    match command {
        "serve" | "" => run_server().await,
        "search" => {
            let Some(query) = args.get(2).filter(|q| !q.starts_with("--")) else {
                eprintln!("Usage: diffusion-studio search <QUERY> [--limit N]");
                return ExitCode::FAILURE;
            };
            let limit = match flag_value(&args, "--limit") {
                Some(v) => match v.parse::<usize>() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Invalid value for --limit: {}", v);
                        return ExitCode::FAILURE;
                    }
                },
                None => DEFAULT_SEARCH_LIMIT,
            };
            let code = cli::search_cmd::run_search(query, limit).await;
            ExitCode::from(code as u8)
        }
        "health" => ExitCode::from(cli::run_health(&addr()).await as u8),
        "live" | "liveness" => ExitCode::from(cli::run_liveness(&addr()).await as u8),
        "ready" | "readiness" => ExitCode::from(cli::run_readiness(&addr()).await as u8),
        "models" => ExitCode::from(cli::models_cmd::run_list(&addr()).await as u8),
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    cli::config_cmd::run_show();
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    cli::config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(cli::config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("diffusion-studio {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "diffusion-studio - text-to-image generation service v{}

USAGE:
    diffusion-studio [COMMAND] [OPTIONS]

COMMANDS:
    serve              Run the HTTP server (default when no command given)
    search <QUERY>     Search the model catalog for text-to-image pipelines
    health             Full health check of a running server (exit 0 if ready)
    live               Liveness check (exit 0 if alive)
    ready              Readiness check (exit 0 if ready)
    models             List models resident on a running server
    config             show | defaults | validate
    version            Show version information
    help               Show this help message

OPTIONS:
    --limit N          Maximum search results (default: {})
    --addr URL         Server address for health/models (default: {})

ENVIRONMENT:
    STUDIO_SERVER_ADDR   Server address for client commands
    STUDIO_*             Server configuration (see `config defaults`)
    RUST_LOG             Log filter, overrides STUDIO_LOG_LEVEL

EXIT CODES:
    0  Success / Healthy
    1  Failure / Unhealthy
    3  Connection error
",
        version,
        DEFAULT_SEARCH_LIMIT,
        cli::DEFAULT_SERVER_ADDR,
    );
}

async fn run_server() -> ExitCode {
    let env = config::load();
    if let Err(e) = telemetry::init_logging(&env.log) {
        eprintln!("Logging setup failed: {}", e);
        return ExitCode::FAILURE;
    }
    for problem in config::validate() {
        tracing::warn!(%problem, "ignoring invalid configuration value");
    }
    tracing::info!(config = ?env.effective_config(), "starting diffusion studio");

    let studio = match Studio::new(env) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match studio.run().await {
        Ok(ShutdownResult::Complete) => ExitCode::SUCCESS,
        Ok(ShutdownResult::Timeout { remaining }) => {
            tracing::warn!(remaining, "exited with generations still running");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
