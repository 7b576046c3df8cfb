//! HTTP client for talking to a running server.

use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::health::HealthReport;
use crate::models::CacheSnapshot;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub struct StudioClient {
    base: String,
    http: reqwest::Client,
}

impl StudioClient {
    pub fn new(base: impl Into<String>) -> Result<Self, CliError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| CliError::Connection(e.to_string()))?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// GET `path` and return the status code with the raw body.
    pub async fn get_raw(&self, path: &str) -> Result<(u16, String), CliError> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .map_err(|e| CliError::Connection(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CliError::Connection(e.to_string()))?;
        Ok((status, body))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let (status, body) = self.get_raw(path).await?;
        if !(200..300).contains(&status) && status != 503 {
            return Err(CliError::Status { status, body });
        }
        serde_json::from_str(&body).map_err(|e| CliError::InvalidResponse(e.to_string()))
    }

    pub async fn health(&self) -> Result<HealthReport, CliError> {
        self.get_json("/health").await
    }

    pub async fn resident(&self) -> Result<CacheSnapshot, CliError> {
        self.get_json("/api/v1/models/resident").await
    }
}
