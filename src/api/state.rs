//! Shared handler state.

use std::sync::Arc;

use crate::engine::GenerationOrchestrator;
use crate::health::{HealthChecker, HealthInputs};
use crate::models::{ModelCache, ModelCatalog};
use crate::shutdown::ShutdownCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    pub fn cache(&self) -> &Arc<ModelCache> {
        self.orchestrator.cache()
    }

    pub fn health_inputs(&self) -> HealthInputs {
        let cache = self.cache();
        HealthInputs {
            shutdown_state: self.shutdown.state(),
            device: cache.device(),
            cache_capacity: cache.capacity(),
            resident_models: cache.resident_models(),
            in_flight: self.shutdown.in_flight_count(),
        }
    }
}
