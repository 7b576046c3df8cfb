//! Model residency and discovery.
//!
//! The bounded LRU cache of loaded pipelines and the remote catalog search.

mod cache;
mod catalog;

pub use cache::{
    Acquired, CacheOutcome, CacheSnapshot, CacheStatsSnapshot, ModelCache, ModelCacheConfig,
    ResidentModel,
};
pub use catalog::{
    parse_models, CatalogError, HubCatalog, HubCatalogConfig, ModelCatalog, DEFAULT_SEARCH_LIMIT,
    MAX_SEARCH_LIMIT,
};
