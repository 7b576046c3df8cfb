//! Tests for the resident-model cache internals.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use image::RgbImage;
use parking_lot::Mutex;

use super::*;
use crate::engine::{
    DeviceMemoryReclaimer, DeviceSpec, GenerationRequest, InferenceError, LoadError, Pipeline,
    PipelineLoader,
};

struct Blank;

impl Pipeline for Blank {
    fn generate(&self, r: &GenerationRequest) -> Result<RgbImage, InferenceError> {
        Ok(RgbImage::new(r.width, r.height))
    }

    fn memory_bytes(&self) -> Option<u64> {
        Some(1024)
    }
}

#[derive(Default)]
struct StubLoader {
    loads: Mutex<Vec<String>>,
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl StubLoader {
    fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    fn loads(&self) -> Vec<String> {
        self.loads.lock().clone()
    }
}

impl PipelineLoader for StubLoader {
    fn load(&self, model_id: &str, _device: &DeviceSpec) -> Result<Box<dyn Pipeline>, LoadError> {
        if let Some(d) = self.delay {
            thread::sleep(d);
        }
        self.loads.lock().push(model_id.to_string());
        if self.failing.contains(model_id) {
            return Err(LoadError::Fetch(format!("{model_id}: 404")));
        }
        Ok(Box::new(Blank))
    }
}

#[derive(Default)]
struct CountingReclaimer(AtomicUsize);

impl DeviceMemoryReclaimer for CountingReclaimer {
    fn reclaim(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn cache_with(max_size: usize, loader: Arc<StubLoader>) -> (ModelCache, Arc<CountingReclaimer>) {
    let reclaimer = Arc::new(CountingReclaimer::default());
    let cache = ModelCache::new(
        ModelCacheConfig { max_size },
        DeviceSpec::cpu(),
        loader,
        reclaimer.clone(),
    );
    (cache, reclaimer)
}

#[test]
fn test_zero_capacity_is_raised_to_one() {
    let (cache, _) = cache_with(0, Arc::new(StubLoader::default()));
    assert_eq!(cache.capacity(), 1);
}

#[test]
fn test_lru_victim_breaks_ties_by_insertion() {
    let mut state = CacheState::default();
    for id in ["a", "b"] {
        let handle = ModelHandle::new(id, DeviceSpec::cpu(), Box::new(Blank));
        let now = state.tick();
        state.entries.insert(
            id.to_string(),
            CacheEntry { handle, last_used: 0, inserted: now, hits: 0 },
        );
    }
    assert_eq!(state.lru_victim().as_deref(), Some("a"));

    state.touch("a");
    assert_eq!(state.lru_victim().as_deref(), Some("b"));
    assert!(state.touch("missing").is_none());
}

#[test]
fn test_hit_refreshes_recency_and_counts() {
    let loader = Arc::new(StubLoader::default());
    let (cache, _) = cache_with(3, loader.clone());
    for id in ["a", "b", "c"] {
        cache.acquire(id).unwrap();
    }
    assert_eq!(cache.resident_models(), vec!["c", "b", "a"]);

    let acquired = cache.acquire_tracked("a").unwrap();
    assert_eq!(acquired.outcome, CacheOutcome::Hit);
    assert_eq!(cache.resident_models(), vec!["a", "c", "b"]);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.loads), (1, 3, 3));
    assert_eq!(loader.loads().len(), 3);
}

#[test]
fn test_empty_identifier_never_reaches_loader() {
    let loader = Arc::new(StubLoader::default());
    let (cache, reclaimer) = cache_with(1, loader.clone());
    assert!(matches!(cache.acquire("   "), Err(LoadError::InvalidModelId(_))));
    assert!(loader.loads().is_empty());
    assert_eq!(reclaimer.0.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failed_load_is_counted_and_leaves_entries() {
    let loader = Arc::new(StubLoader::failing(&["bad"]));
    let (cache, _) = cache_with(1, loader);
    cache.acquire("good").unwrap();

    assert!(matches!(cache.acquire("bad"), Err(LoadError::Fetch(_))));
    assert_eq!(cache.resident_models(), vec!["good"]);
    let stats = cache.stats();
    assert_eq!(stats.load_failures, 1);
    assert_eq!(stats.evictions, 0);
}

#[test]
fn test_invalidate_only_removes_same_instance() {
    let (cache, _) = cache_with(1, Arc::new(StubLoader::default()));
    let first = cache.acquire("a").unwrap();
    cache.evict("a");
    let second = cache.acquire("a").unwrap();

    assert!(!cache.invalidate(&first));
    assert!(cache.contains("a"));
    assert!(cache.invalidate(&second));
    assert!(!cache.contains("a"));
    assert!(!cache.invalidate(&second));
}

#[test]
fn test_clear_drops_everything_with_one_reclaim() {
    let (cache, reclaimer) = cache_with(4, Arc::new(StubLoader::default()));
    for id in ["a", "b", "c"] {
        cache.acquire(id).unwrap();
    }
    let before = reclaimer.0.load(Ordering::SeqCst);
    assert_eq!(cache.clear(), 3);
    assert_eq!(cache.size(), 0);
    assert_eq!(reclaimer.0.load(Ordering::SeqCst), before + 1);
    assert_eq!(cache.clear(), 0);
    assert_eq!(reclaimer.0.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_snapshot_reports_in_use_handles() {
    let (cache, _) = cache_with(2, Arc::new(StubLoader::default()));
    let held = cache.acquire("a").unwrap();
    cache.acquire("b").unwrap();

    let snap = cache.snapshot();
    assert_eq!(snap.capacity, 2);
    let ids: Vec<&str> = snap.entries.iter().map(|e| e.model_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
    assert_eq!(snap.entries[1].in_use, 1);
    assert_eq!(snap.entries[0].in_use, 0);
    assert_eq!(snap.entries[0].memory_bytes, Some(1024));
    drop(held);
}

#[test]
fn test_concurrent_misses_for_same_id_load_once() {
    let loader = Arc::new(StubLoader::slow(Duration::from_millis(30)));
    let (cache, _) = cache_with(1, loader.clone());
    let cache = Arc::new(cache);
    let barrier = Arc::new(Barrier::new(4));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.acquire("a").unwrap()
            })
        })
        .collect();
    let handles: Vec<ModelHandle> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(loader.loads(), vec!["a"]);
    assert!(handles.windows(2).all(|w| w[0].same_instance(&w[1])));
    assert_eq!(cache.size(), 1);
}

#[test]
fn test_hit_does_not_wait_for_a_slow_miss() {
    let loader = Arc::new(StubLoader::default());
    let (cache, _) = cache_with(2, loader);
    cache.acquire("a").unwrap();
    let cache = Arc::new(cache);

    // Hold the load lock as an in-progress miss would.
    let guard = cache.load_lock.lock();
    let hit = {
        let cache = cache.clone();
        thread::spawn(move || cache.acquire_tracked("a").map(|a| a.outcome))
    };
    let outcome = hit.join().unwrap().unwrap();
    drop(guard);
    assert_eq!(outcome, CacheOutcome::Hit);
}
