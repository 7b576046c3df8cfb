//! Diffusion Studio
//!
//! A text-to-image generation service. A bounded cache keeps recently used
//! Stable Diffusion pipelines resident on one device and evicts the least
//! recently used one when a new model is requested. Generation runs the
//! pipeline and returns a base64-encoded PNG over HTTP.
//!
//! # Components
//!
//! - [`models::ModelCache`]: resident pipelines with LRU eviction and device
//!   memory reclamation around every load and eviction.
//! - [`engine::GenerationOrchestrator`]: validate, acquire, invoke, encode.
//! - [`api`]: axum routes for generation, catalog search and introspection.
//! - [`Studio`]: composition root owning every component.

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod health;
pub mod models;
pub mod shutdown;
pub mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use api::AppState;
use config::EnvConfig;
use engine::{
    select_device, DeviceMemoryReclaimer, DeviceReclaimer, DeviceSpec, DiffusionLoader,
    GenerationOrchestrator, PipelineLoader,
};
use health::HealthChecker;
use models::{CatalogError, HubCatalog, ModelCache, ModelCatalog};
use shutdown::{ShutdownCoordinator, ShutdownResult};

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("failed to build model catalog client: {0}")]
    Catalog(#[from] CatalogError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Collaborators injected into [`Studio::with_components`].
pub struct Components {
    pub device: DeviceSpec,
    pub loader: Arc<dyn PipelineLoader>,
    pub reclaimer: Arc<dyn DeviceMemoryReclaimer>,
    pub catalog: Arc<dyn ModelCatalog>,
}

/// The running service: one cache, one device, one orchestrator.
pub struct Studio {
    config: EnvConfig,
    cache: Arc<ModelCache>,
    orchestrator: Arc<GenerationOrchestrator>,
    catalog: Arc<dyn ModelCatalog>,
    shutdown: Arc<ShutdownCoordinator>,
    health: Arc<HealthChecker>,
}

impl Studio {
    /// Build the production stack: device selection, the diffusion loader,
    /// the device reclaimer and the Hub catalog.
    pub fn new(config: EnvConfig) -> Result<Self, StudioError> {
        let device = select_device(&config.device);
        if let Err(e) = engine::diffusion::init_device(&device) {
            tracing::warn!(device = %device, error = %e, "device init failed, retrying on first load");
        }
        let components = Components {
            device,
            loader: Arc::new(DiffusionLoader::new(config.diffusion.clone())),
            reclaimer: Arc::new(DeviceReclaimer::new(device)),
            catalog: Arc::new(HubCatalog::new(config.catalog.clone())?),
        };
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: EnvConfig, components: Components) -> Self {
        telemetry::init_metrics();
        let cache = Arc::new(ModelCache::new(
            config.cache.clone(),
            components.device,
            components.loader,
            components.reclaimer,
        ));
        let orchestrator = Arc::new(GenerationOrchestrator::new(cache.clone()));
        let health = Arc::new(HealthChecker::new(config.health.clone()));
        Self {
            config,
            cache,
            orchestrator,
            catalog: components.catalog,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            health,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<GenerationOrchestrator> {
        &self.orchestrator
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: self.orchestrator.clone(),
            catalog: self.catalog.clone(),
            shutdown: self.shutdown.clone(),
            health: self.health.clone(),
        }
    }

    pub fn router(&self) -> axum::Router {
        api::build_router(self.app_state())
    }

    /// Bind the configured address and serve until Ctrl+C, the shutdown
    /// token, or the server stopping on its own; then drain and release
    /// every resident pipeline.
    pub async fn run(&self) -> Result<ShutdownResult, StudioError> {
        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| StudioError::Bind { addr, source })?;

        let token = self.shutdown.token();
        let mut server = tokio::spawn(api::serve(listener, self.app_state(), token.clone()));

        // Without a signal handler only the token or the server can stop us.
        let signal = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("shutdown signal received"),
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
        };

        let exited = tokio::select! {
            biased;
            _ = signal => None,
            _ = token.cancelled() => None,
            joined = &mut server => {
                tracing::warn!("server stopped unexpectedly");
                Some(joined)
            }
        };

        let result = self.shutdown().await;
        let joined = match exited {
            Some(joined) => joined,
            None => server.await,
        };
        match joined {
            Ok(Ok(())) => Ok(result),
            Ok(Err(e)) => Err(StudioError::Serve(e)),
            Err(e) => Err(StudioError::Serve(std::io::Error::other(e))),
        }
    }

    /// Stop accepting generations, wait for in-flight ones, clear the cache.
    pub async fn shutdown(&self) -> ShutdownResult {
        let result = self.shutdown.initiate(self.config.shutdown_timeout).await;
        let released = self.cache.clear();
        tracing::info!(released, "model cache cleared");
        result
    }
}
