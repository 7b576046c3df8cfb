//! Liveness, readiness and full health reports.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::DeviceSpec;
use crate::shutdown::ShutdownState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub device: DeviceSpec,
    pub cache_capacity: usize,
    pub resident_models: Vec<String>,
    pub in_flight_generations: u32,
    pub uptime_secs: u64,
}

/// Inputs sampled from the running components.
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub shutdown_state: ShutdownState,
    pub device: DeviceSpec,
    pub cache_capacity: usize,
    pub resident_models: Vec<String>,
    pub in_flight: u32,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Report `Degraded` until at least one model is resident.
    pub require_model_loaded: bool,
    /// In-flight generations at or above which the service is `Degraded`.
    pub max_in_flight: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            require_model_loaded: false,
            max_in_flight: 64,
        }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    pub fn is_ready(&self, inputs: &HealthInputs) -> bool {
        self.compute_state(inputs) == HealthState::Healthy
    }

    pub fn report(&self, inputs: HealthInputs) -> HealthReport {
        let state = self.compute_state(&inputs);
        HealthReport {
            state,
            ready: state == HealthState::Healthy,
            accepting_requests: inputs.shutdown_state == ShutdownState::Running,
            device: inputs.device,
            cache_capacity: inputs.cache_capacity,
            resident_models: inputs.resident_models,
            in_flight_generations: inputs.in_flight,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, inputs: &HealthInputs) -> HealthState {
        if inputs.shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if self.config.require_model_loaded && inputs.resident_models.is_empty() {
            return HealthState::Degraded;
        }
        if inputs.in_flight >= self.config.max_in_flight {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
