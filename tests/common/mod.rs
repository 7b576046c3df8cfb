//! Recording test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use parking_lot::{Condvar, Mutex};

use diffusion_studio::config::EnvConfig;
use diffusion_studio::engine::{
    DeviceConfig, DeviceMemoryReclaimer, DeviceSpec, DiffusionConfig, GenerationRequest,
    InferenceError, LoadError, Pipeline, PipelineLoader,
};
use diffusion_studio::health::HealthConfig;
use diffusion_studio::models::{
    CatalogError, HubCatalogConfig, ModelCache, ModelCacheConfig, ModelCatalog,
};
use diffusion_studio::telemetry::LogConfig;
use diffusion_studio::{Components, Studio};

/// Ordered record of loader, pipeline and reclaimer events.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Blocks pipelines inside `generate` until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Callers that have reached the gate so far.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Block until `n` callers have reached the gate or `timeout` passes.
    pub fn wait_entered(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.entered() < n {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }
}

#[derive(Clone)]
pub enum Behavior {
    Solid,
    Poisoned,
    DeviceFault,
    Empty,
    /// Waits at the gate, then paints a solid image.
    Gated(Arc<Gate>),
}

/// Pipeline that paints a solid image and logs `generate:` and `drop:`.
pub struct RecordingPipeline {
    model_id: String,
    log: EventLog,
    behavior: Behavior,
}

impl Pipeline for RecordingPipeline {
    fn generate(&self, request: &GenerationRequest) -> Result<RgbImage, InferenceError> {
        self.log.push(format!("generate:{}", self.model_id));
        match &self.behavior {
            Behavior::Gated(gate) => {
                gate.pass();
                Ok(RgbImage::from_pixel(request.width, request.height, Rgb([40, 90, 200])))
            }
            Behavior::Solid => Ok(RgbImage::from_pixel(request.width, request.height, Rgb([40, 90, 200]))),
            Behavior::Poisoned => Err(InferenceError::Poisoned("nan in latents".into())),
            Behavior::DeviceFault => Err(InferenceError::Device("kernel launch failed".into())),
            Behavior::Empty => Ok(RgbImage::new(0, 0)),
        }
    }
}

impl Drop for RecordingPipeline {
    fn drop(&mut self) {
        self.log.push(format!("drop:{}", self.model_id));
    }
}

/// Loader that logs `load:<id>` and builds [`RecordingPipeline`]s.
pub struct RecordingLoader {
    pub log: EventLog,
    failing: HashSet<String>,
    behaviors: Mutex<Vec<(String, Behavior)>>,
    delay: Option<Duration>,
    loads: AtomicUsize,
}

impl RecordingLoader {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            failing: HashSet::new(),
            behaviors: Mutex::new(Vec::new()),
            delay: None,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Pipelines loaded for `id` from now on behave as `behavior`.
    pub fn set_behavior(&self, id: &str, behavior: Behavior) {
        self.behaviors.lock().push((id.to_string(), behavior));
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, id: &str) -> Behavior {
        self.behaviors
            .lock()
            .iter()
            .rev()
            .find(|(m, _)| m == id)
            .map(|(_, b)| b.clone())
            .unwrap_or(Behavior::Solid)
    }
}

impl PipelineLoader for RecordingLoader {
    fn load(&self, model_id: &str, _device: &DeviceSpec) -> Result<Box<dyn Pipeline>, LoadError> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        self.log.push(format!("load:{model_id}"));
        if self.failing.contains(model_id) {
            return Err(LoadError::Fetch(format!("{model_id}: repository not found")));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingPipeline {
            model_id: model_id.to_string(),
            log: self.log.clone(),
            behavior: self.behavior_for(model_id),
        }))
    }
}

/// Reclaimer that logs `reclaim[<resident ids>]` as seen at call time.
#[derive(Default)]
pub struct RecordingReclaimer {
    log: EventLog,
    cache: OnceLock<Weak<ModelCache>>,
    passes: AtomicUsize,
}

impl RecordingReclaimer {
    pub fn new(log: EventLog) -> Self {
        Self { log, cache: OnceLock::new(), passes: AtomicUsize::new(0) }
    }

    pub fn observe(&self, cache: &Arc<ModelCache>) {
        let _ = self.cache.set(Arc::downgrade(cache));
    }

    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

impl DeviceMemoryReclaimer for RecordingReclaimer {
    fn reclaim(&self) {
        self.passes.fetch_add(1, Ordering::SeqCst);
        let resident = self
            .cache
            .get()
            .and_then(Weak::upgrade)
            .map(|c| {
                let mut ids = c.resident_models();
                ids.sort();
                ids.join(",")
            })
            .unwrap_or_default();
        self.log.push(format!("reclaim[{resident}]"));
    }
}

/// Cache wired to recording doubles that share one event log.
pub struct Harness {
    pub log: EventLog,
    pub loader: Arc<RecordingLoader>,
    pub reclaimer: Arc<RecordingReclaimer>,
    pub cache: Arc<ModelCache>,
}

pub fn harness(max_size: usize) -> Harness {
    harness_with(max_size, |l| l)
}

pub fn harness_with(max_size: usize, f: impl FnOnce(RecordingLoader) -> RecordingLoader) -> Harness {
    let log = EventLog::default();
    let loader = Arc::new(f(RecordingLoader::new(log.clone())));
    let reclaimer = Arc::new(RecordingReclaimer::new(log.clone()));
    let cache = Arc::new(ModelCache::new(
        ModelCacheConfig { max_size },
        DeviceSpec::cpu(),
        loader.clone(),
        reclaimer.clone(),
    ));
    reclaimer.observe(&cache);
    Harness { log, loader, reclaimer, cache }
}

/// Catalog returning a fixed ranked list, or failing.
pub struct StaticCatalog {
    models: Vec<String>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl StaticCatalog {
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(|s| s.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self { models: Vec::new(), fail: true, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ModelCatalog for StaticCatalog {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CatalogError::Unavailable("connection refused".into()));
        }
        Ok(self
            .models
            .iter()
            .filter(|m| m.contains(query))
            .take(limit)
            .cloned()
            .collect())
    }
}

pub fn test_config(max_size: usize) -> EnvConfig {
    EnvConfig {
        bind_addr: "127.0.0.1:0".parse().expect("addr"),
        cache: ModelCacheConfig { max_size },
        device: DeviceConfig::default(),
        diffusion: DiffusionConfig::default(),
        catalog: HubCatalogConfig::default(),
        shutdown_timeout: Duration::from_millis(200),
        health: HealthConfig::default(),
        log: LogConfig::default(),
    }
}

/// Studio over recording doubles.
pub struct TestStudio {
    pub studio: Studio,
    pub log: EventLog,
    pub loader: Arc<RecordingLoader>,
    pub reclaimer: Arc<RecordingReclaimer>,
}

pub fn studio(max_size: usize, loader: RecordingLoader, catalog: StaticCatalog) -> TestStudio {
    studio_with_config(test_config(max_size), loader, catalog)
}

pub fn studio_with_config(
    config: EnvConfig,
    loader: RecordingLoader,
    catalog: StaticCatalog,
) -> TestStudio {
    let log = loader.log.clone();
    let loader = Arc::new(loader);
    let reclaimer = Arc::new(RecordingReclaimer::new(log.clone()));
    let studio = Studio::with_components(
        config,
        Components {
            device: DeviceSpec::cpu(),
            loader: loader.clone(),
            reclaimer: reclaimer.clone(),
            catalog: Arc::new(catalog),
        },
    );
    reclaimer.observe(studio.cache());
    TestStudio { studio, log, loader, reclaimer }
}

pub fn request(model_id: &str, prompt: &str) -> GenerationRequest {
    let mut req = GenerationRequest::new(model_id, prompt);
    req.height = 256;
    req.width = 256;
    req.num_steps = 10;
    req.guidance_scale = 5.0;
    req
}
