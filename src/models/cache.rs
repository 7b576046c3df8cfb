//! Bounded cache of resident pipelines with least-recently-used eviction.
//!
//! # Locking
//!
//! Two locks, always taken in this order:
//!
//! - `load_lock` serializes the miss path (reclaim, load, evict, insert), so
//!   no identifier is ever loaded twice concurrently and only one insertion
//!   can be pending at a time.
//! - `state` guards the entry map and is only held for bookkeeping, never
//!   across a load, a reclamation pass, or an inference call.
//!
//! Hits, `evict`, `size` and `contains` only touch `state` and therefore never
//! wait behind a long load.
//!
//! # In-flight eviction
//!
//! Evicting an entry drops the cache's reference only. A request that is
//! mid-inference on that handle keeps it alive until it finishes, after which
//! the pipeline is dropped. With a capacity of one this means a hot swap can
//! briefly hold two pipelines on the device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::engine::{DeviceMemoryReclaimer, DeviceSpec, LoadError, ModelHandle, PipelineLoader};
use crate::telemetry;

/// Configuration for the resident-model cache.
#[derive(Debug, Clone)]
pub struct ModelCacheConfig {
    /// Maximum number of resident pipelines. Values below 1 are raised to 1.
    pub max_size: usize,
}

impl Default for ModelCacheConfig {
    fn default() -> Self {
        Self { max_size: 1 }
    }
}

/// Whether `acquire` was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// Result of [`ModelCache::acquire_tracked`].
#[derive(Debug, Clone)]
pub struct Acquired {
    pub handle: ModelHandle,
    pub outcome: CacheOutcome,
}

struct CacheEntry {
    handle: ModelHandle,
    /// Logical clock value of the last access.
    last_used: u64,
    /// Logical clock value at insertion; breaks recency ties.
    inserted: u64,
    hits: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Least recently used entry; oldest insertion wins a tie.
    fn lru_victim(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| (e.last_used, e.inserted))
            .map(|(id, _)| id.clone())
    }

    fn touch(&mut self, model_id: &str) -> Option<ModelHandle> {
        let now = self.clock + 1;
        let entry = self.entries.get_mut(model_id)?;
        entry.last_used = now;
        entry.hits += 1;
        self.clock = now;
        Some(entry.handle.clone())
    }
}

#[derive(Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
}

/// One resident model in a [`CacheSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidentModel {
    pub model_id: String,
    pub device: DeviceSpec,
    pub hits: u64,
    pub resident_secs: u64,
    pub memory_bytes: Option<u64>,
    /// Requests currently holding this handle, excluding the cache itself.
    pub in_use: usize,
}

/// Serializable view of the cache, entries ordered most recently used first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub capacity: usize,
    pub device: DeviceSpec,
    pub entries: Vec<ResidentModel>,
    pub stats: CacheStatsSnapshot,
}

/// Resident-model cache. One instance per process.
pub struct ModelCache {
    max_size: usize,
    device: DeviceSpec,
    loader: Arc<dyn PipelineLoader>,
    reclaimer: Arc<dyn DeviceMemoryReclaimer>,
    load_lock: Mutex<()>,
    state: Mutex<CacheState>,
    stats: CacheStats,
}

impl ModelCache {
    pub fn new(
        config: ModelCacheConfig,
        device: DeviceSpec,
        loader: Arc<dyn PipelineLoader>,
        reclaimer: Arc<dyn DeviceMemoryReclaimer>,
    ) -> Self {
        let max_size = config.max_size.max(1);
        tracing::info!(capacity = max_size, device = %device, "model cache initialized");
        Self {
            max_size,
            device,
            loader,
            reclaimer,
            load_lock: Mutex::new(()),
            state: Mutex::new(CacheState::default()),
            stats: CacheStats::default(),
        }
    }

    /// Return a ready-to-use handle for `model_id`, loading it on a miss.
    pub fn acquire(&self, model_id: &str) -> Result<ModelHandle, LoadError> {
        self.acquire_tracked(model_id).map(|a| a.handle)
    }

    /// Like [`acquire`](Self::acquire), also reporting hit or miss.
    pub fn acquire_tracked(&self, model_id: &str) -> Result<Acquired, LoadError> {
        if model_id.trim().is_empty() {
            return Err(LoadError::InvalidModelId(model_id.to_string()));
        }

        if let Some(handle) = self.hit(model_id) {
            return Ok(Acquired { handle, outcome: CacheOutcome::Hit });
        }

        let _loading = self.load_lock.lock();

        // Loaded by whoever held the load lock before us.
        if let Some(handle) = self.hit(model_id) {
            return Ok(Acquired { handle, outcome: CacheOutcome::Hit });
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        telemetry::record_cache_miss();
        tracing::info!(model_id, device = %self.device, "cache miss, loading pipeline");

        self.reclaimer.reclaim();

        let started = Instant::now();
        let pipeline = match self.loader.load(model_id, &self.device) {
            Ok(p) => p,
            Err(e) => {
                self.stats.load_failures.fetch_add(1, Ordering::Relaxed);
                telemetry::record_model_load(started.elapsed(), false);
                tracing::warn!(model_id, error = %e, "pipeline load failed");
                return Err(e);
            }
        };
        let load_time = started.elapsed();
        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        telemetry::record_model_load(load_time, true);
        tracing::info!(model_id, load_ms = load_time.as_millis() as u64, "pipeline loaded");

        let handle = ModelHandle::new(model_id, self.device, pipeline);
        self.insert(handle.clone());
        Ok(Acquired { handle, outcome: CacheOutcome::Miss })
    }

    /// Remove `model_id` if resident. Returns whether an entry existed.
    pub fn evict(&self, model_id: &str) -> bool {
        let removed = self.state.lock().entries.remove(model_id);
        match removed {
            Some(entry) => {
                drop(entry);
                self.after_eviction(&[model_id.to_string()], "explicit");
                true
            }
            None => false,
        }
    }

    /// Evict `handle` only if it is still the resident instance for its id.
    ///
    /// Used for pipelines that reported themselves unusable; a newer handle
    /// loaded under the same identifier is left alone.
    pub fn invalidate(&self, handle: &ModelHandle) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let is_resident = state
                .entries
                .get(handle.model_id())
                .is_some_and(|e| e.handle.same_instance(handle));
            if is_resident {
                state.entries.remove(handle.model_id())
            } else {
                None
            }
        };
        match removed {
            Some(entry) => {
                drop(entry);
                self.after_eviction(&[handle.model_id().to_string()], "poisoned");
                true
            }
            None => false,
        }
    }

    /// Drop every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<(String, CacheEntry)> = self.state.lock().entries.drain().collect();
        if drained.is_empty() {
            return 0;
        }
        let ids: Vec<String> = drained.iter().map(|(id, _)| id.clone()).collect();
        drop(drained);
        self.after_eviction(&ids, "clear");
        ids.len()
    }

    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.state.lock().entries.contains_key(model_id)
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn device(&self) -> DeviceSpec {
        self.device
    }

    /// Resident identifiers, most recently used first.
    pub fn resident_models(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut entries: Vec<(&String, &CacheEntry)> = state.entries.iter().collect();
        entries.sort_by_key(|(_, e)| std::cmp::Reverse((e.last_used, e.inserted)));
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            loads: self.stats.loads.load(Ordering::Relaxed),
            load_failures: self.stats.load_failures.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let mut entries: Vec<(u64, u64, ResidentModel)> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .map(|(id, e)| {
                    let model = ResidentModel {
                        model_id: id.clone(),
                        device: e.handle.device(),
                        hits: e.hits,
                        resident_secs: e.handle.loaded_at().elapsed().as_secs(),
                        memory_bytes: e.handle.memory_bytes(),
                        in_use: e.handle.ref_count().saturating_sub(1),
                    };
                    (e.last_used, e.inserted, model)
                })
                .collect()
        };
        entries.sort_by_key(|(used, inserted, _)| std::cmp::Reverse((*used, *inserted)));

        CacheSnapshot {
            capacity: self.max_size,
            device: self.device,
            entries: entries.into_iter().map(|(_, _, m)| m).collect(),
            stats: self.stats(),
        }
    }

    fn hit(&self, model_id: &str) -> Option<ModelHandle> {
        let handle = self.state.lock().touch(model_id)?;
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        telemetry::record_cache_hit();
        tracing::debug!(model_id, "cache hit");
        Some(handle)
    }

    /// Insert a freshly loaded handle, evicting LRU entries to make room.
    ///
    /// Caller must hold `load_lock`. Between releasing `state` for the
    /// reclamation pass and re-taking it, only hits and evictions can run,
    /// neither of which grows the map.
    fn insert(&self, handle: ModelHandle) {
        let victims = {
            let mut state = self.state.lock();
            let mut victims = Vec::new();
            while state.entries.len() >= self.max_size {
                let Some(id) = state.lru_victim() else { break };
                if let Some(entry) = state.entries.remove(&id) {
                    victims.push((id, entry));
                }
            }
            victims
        };

        if !victims.is_empty() {
            let ids: Vec<String> = victims.iter().map(|(id, _)| id.clone()).collect();
            drop(victims);
            self.after_eviction(&ids, "capacity");
        }

        let mut state = self.state.lock();
        let now = state.tick();
        state.entries.insert(
            handle.model_id().to_string(),
            CacheEntry { handle, last_used: now, inserted: now, hits: 0 },
        );
        telemetry::set_resident_models(state.entries.len());
    }

    fn after_eviction(&self, model_ids: &[String], reason: &'static str) {
        for id in model_ids {
            tracing::info!(model_id = %id, reason, "evicted pipeline");
        }
        let n = model_ids.len() as u64;
        self.stats.evictions.fetch_add(n, Ordering::Relaxed);
        telemetry::record_evictions(n);
        self.reclaimer.reclaim();
        telemetry::set_resident_models(self.size());
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
