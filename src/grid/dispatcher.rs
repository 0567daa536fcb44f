//! Dispatcher client
//!
//! Dispatchers are external services that spawn scanner instances on demand.
//! The master asks its configured dispatchers for their info, prefers one
//! dispatcher per pipe id (instances sharing a pipe share line capacity),
//! and round-robins spawn requests across the preferred set. A dispatcher
//! that fails to answer is skipped for the cycle.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

use crate::grid::client::{ApiResponse, ClientError};
use crate::grid::instance::Instance;

// ============================================================================
// Wire types
// ============================================================================

/// Info advertised by a dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherInfo {
    /// Dispatcher address
    pub url: String,

    /// Identifier of the network pipe this dispatcher's instances share
    pub pipe_id: String,
}

/// Request to spawn a new scanner instance
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Who is asking (the master's address)
    pub owner: String,
}

// ============================================================================
// Dispatcher Client
// ============================================================================

/// Client for spawning slave instances through dispatchers
#[derive(Debug, Clone)]
pub struct DispatcherClient {
    http: Client,
    dispatchers: Vec<String>,
}

impl DispatcherClient {
    pub fn new(dispatchers: Vec<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self { http, dispatchers })
    }

    /// Whether any dispatchers are configured
    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    /// Resolve the preferred dispatcher set: one per unique pipe id
    ///
    /// Dispatchers with distinct pipe ids aggregate line capacity across the
    /// grid; duplicates on the same pipe add nothing, so only the first per
    /// pipe survives. Unreachable dispatchers are dropped.
    pub async fn preferred(&self) -> Vec<DispatcherInfo> {
        let mut seen_pipes = HashSet::new();
        let mut preferred = Vec::new();

        for dispatcher in &self.dispatchers {
            match self.info(dispatcher).await {
                Ok(info) => {
                    if seen_pipes.insert(info.pipe_id.clone()) {
                        preferred.push(info);
                    }
                }
                Err(e) => {
                    warn!(dispatcher = %dispatcher, error = %e, "dispatcher unreachable");
                }
            }
        }

        preferred
    }

    /// Ask a dispatcher to spawn a new scanner instance
    pub async fn dispatch(
        &self,
        dispatcher_url: &str,
        owner: &str,
    ) -> Result<Instance, ClientError> {
        let body = DispatchRequest {
            owner: owner.to_string(),
        };

        let response = self
            .http
            .post(format!("http://{dispatcher_url}/api/dispatcher/dispatch"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: ApiResponse<Instance> = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))?;

        envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("missing instance".to_string()))
    }

    async fn info(&self, dispatcher_url: &str) -> Result<DispatcherInfo, ClientError> {
        let response = self
            .http
            .get(format!("http://{dispatcher_url}/api/dispatcher/info"))
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: ApiResponse<DispatcherInfo> = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))?;

        envelope
            .data
            .ok_or_else(|| ClientError::InvalidResponse("missing info".to_string()))
    }
}
