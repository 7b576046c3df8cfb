//! Remote model catalog search.
//!
//! Read-only pass-through to the Hugging Face Hub model listing, filtered to
//! text-to-image diffusers pipelines and sorted by downloads. Never touches
//! the cache.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Largest `limit` forwarded to the catalog.
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("model catalog unavailable: {0}")]
    Unavailable(String),

    #[error("model catalog returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Identifiers matching `query`, most downloaded first, at most `limit`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CatalogError>;
}

#[derive(Debug, Clone)]
pub struct HubCatalogConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HubCatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://huggingface.co".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HubCatalog {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct HubModel {
    id: String,
}

impl HubCatalog {
    pub fn new(config: HubCatalogConfig) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("diffusion-studio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn models_url(&self) -> String {
        format!("{}/api/models", self.base_url)
    }
}

#[async_trait]
impl ModelCatalog for HubCatalog {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, CatalogError> {
        let limit = limit.min(MAX_SEARCH_LIMIT);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit_param = limit.to_string();

        let response = self
            .client
            .get(self.models_url())
            .query(&[
                ("search", query),
                ("pipeline_tag", "text-to-image"),
                ("library", "diffusers"),
                ("sort", "downloads"),
                ("direction", "-1"),
                ("limit", limit_param.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Unavailable(format!("catalog responded {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let models = parse_models(&body, limit)?;
        tracing::debug!(query, limit, found = models.len(), "catalog search");
        Ok(models)
    }
}

/// Parse a Hub listing body, keeping order and at most `limit` entries.
pub fn parse_models(body: &str, limit: usize) -> Result<Vec<String>, CatalogError> {
    let models: Vec<HubModel> =
        serde_json::from_str(body).map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
    Ok(models.into_iter().take(limit).map(|m| m.id).collect())
}
