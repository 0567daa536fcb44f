//! RPC client for talking to peer instances
//!
//! Wraps every intra-grid call the coordination layer makes: master → slave
//! (set_master, workload distribution, pause/resume/run/clean_up, progress)
//! and slave → master (privileged callbacks carrying the master's token).
//! Requests carry the target's public token in `X-Auth-Token`; transient
//! failures are retried with backoff, and callers that aggregate simply drop
//! a peer whose call ultimately fails.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ScanOptions;
use crate::grid::instance::Instance;
use crate::grid::issues::Issue;
use crate::scan::audit::PluginResults;
use crate::scan::progress::{ProgressOptions, ProgressReport};
use crate::scan::spider::Page;
use crate::utils::retry::{retry, RetryConfig};

/// Header carrying the target instance's public token
pub const AUTH_HEADER: &str = "X-Auth-Token";

// ============================================================================
// Wire types
// ============================================================================

/// Response envelope used by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Instance descriptor as received over the wire; fields checked explicitly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub url: Option<String>,
    pub token: Option<String>,
}

impl From<&Instance> for InstanceDescriptor {
    fn from(instance: &Instance) -> Self {
        Self {
            url: Some(instance.url.clone()),
            token: Some(instance.token.clone()),
        }
    }
}

/// Body of `set_master`
#[derive(Debug, Serialize, Deserialize)]
pub struct SetMasterRequest {
    /// The master instance (address + public token)
    pub master: Instance,

    /// The master's privileged token, used on slave callbacks
    pub priv_token: String,

    /// Propagated scan options
    pub options: ScanOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestrictPathsRequest {
    pub paths: Vec<String>,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestrictElementsRequest {
    pub elements: Vec<String>,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ElementIdsRequest {
    pub entries: BTreeMap<String, Vec<String>>,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_done_peer_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageQueueRequest {
    pub pages: Vec<Page>,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlaveDoneRequest {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssuesRequest {
    pub issues: Vec<Issue>,
    pub token: String,
}

/// Response of `clean_up`: the op result plus the peer's plugin results
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CleanUpResponse {
    pub cleaned: bool,
    pub plugin_results: PluginResults,
}

// ============================================================================
// Grid Client
// ============================================================================

/// Client for the intra-grid RPC surface
#[derive(Debug, Clone)]
pub struct GridClient {
    http: Client,
    retry: RetryConfig,
}

impl GridClient {
    /// Create a client with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            http,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    // ------------------------------------------------------------------
    // Public surface
    // ------------------------------------------------------------------

    pub async fn run(&self, target: &Instance) -> Result<bool, ClientError> {
        self.post(target, "scan/run", &()).await
    }

    pub async fn pause(&self, target: &Instance) -> Result<bool, ClientError> {
        self.post(target, "scan/pause", &()).await
    }

    pub async fn resume(&self, target: &Instance) -> Result<bool, ClientError> {
        self.post(target, "scan/resume", &()).await
    }

    pub async fn clean_up(&self, target: &Instance) -> Result<CleanUpResponse, ClientError> {
        self.post(target, "scan/clean_up", &()).await
    }

    pub async fn progress(
        &self,
        target: &Instance,
        opts: ProgressOptions,
    ) -> Result<ProgressReport, ClientError> {
        self.post(target, "scan/progress", &opts).await
    }

    pub async fn set_master(
        &self,
        target: &Instance,
        request: &SetMasterRequest,
    ) -> Result<bool, ClientError> {
        self.post(target, "grid/set_master", request).await
    }

    pub async fn set_as_master(&self, target: &Instance) -> Result<bool, ClientError> {
        self.post(target, "grid/set_as_master", &()).await
    }

    pub async fn enslave(
        &self,
        target: &Instance,
        slave: &Instance,
    ) -> Result<bool, ClientError> {
        let descriptor = InstanceDescriptor::from(slave);
        self.post(target, "grid/enslave", &descriptor).await
    }

    // ------------------------------------------------------------------
    // Privileged surface
    // ------------------------------------------------------------------

    pub async fn restrict_paths(
        &self,
        target: &Instance,
        paths: Vec<String>,
        token: &str,
    ) -> Result<bool, ClientError> {
        let body = RestrictPathsRequest {
            paths,
            token: token.to_string(),
        };
        self.post(target, "grid/restrict_paths", &body).await
    }

    pub async fn restrict_to_elements(
        &self,
        target: &Instance,
        elements: Vec<String>,
        token: &str,
    ) -> Result<bool, ClientError> {
        let body = RestrictElementsRequest {
            elements,
            token: token.to_string(),
        };
        self.post(target, "grid/restrict_to_elements", &body).await
    }

    pub async fn update_page_queue(
        &self,
        target: &Instance,
        pages: Vec<Page>,
        token: &str,
    ) -> Result<bool, ClientError> {
        let body = PageQueueRequest {
            pages,
            token: token.to_string(),
        };
        self.post(target, "grid/page_queue", &body).await
    }

    pub async fn update_element_ids_per_page(
        &self,
        target: &Instance,
        entries: BTreeMap<String, Vec<String>>,
        token: &str,
        signal_done_peer_url: Option<String>,
    ) -> Result<bool, ClientError> {
        let body = ElementIdsRequest {
            entries,
            token: token.to_string(),
            signal_done_peer_url,
        };
        self.post(target, "grid/element_ids_per_page", &body).await
    }

    pub async fn slave_done(
        &self,
        target: &Instance,
        url: &str,
        token: &str,
    ) -> Result<bool, ClientError> {
        let body = SlaveDoneRequest {
            url: url.to_string(),
            token: token.to_string(),
        };
        self.post(target, "grid/slave_done", &body).await
    }

    pub async fn register_issues(
        &self,
        target: &Instance,
        issues: Vec<Issue>,
        token: &str,
    ) -> Result<bool, ClientError> {
        let body = IssuesRequest {
            issues,
            token: token.to_string(),
        };
        self.post(target, "grid/issues", &body).await
    }

    pub async fn register_issue_summaries(
        &self,
        target: &Instance,
        issues: Vec<Issue>,
        token: &str,
    ) -> Result<bool, ClientError> {
        let body = IssuesRequest {
            issues,
            token: token.to_string(),
        };
        self.post(target, "grid/issue_summaries", &body).await
    }

    /// Distribute one workload chunk to a slave, then start its audit
    pub async fn distribute_and_run(
        &self,
        slave: &Instance,
        urls: Vec<String>,
        elements: Vec<String>,
        pages: Vec<Page>,
        token: &str,
    ) -> Result<bool, ClientError> {
        self.restrict_paths(slave, urls, token).await?;
        self.restrict_to_elements(slave, elements, token).await?;
        if !pages.is_empty() {
            self.update_page_queue(slave, pages, token).await?;
        }
        self.run(slave).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn post<T, R>(
        &self,
        target: &Instance,
        path: &str,
        body: &T,
    ) -> Result<R, ClientError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("http://{}/api/{}", target.url, path);

        let response = retry(&self.retry, || async {
            let response = self
                .http
                .post(&url)
                .header(AUTH_HEADER, &target.token)
                .json(body)
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

            response
                .json::<ApiResponse<R>>()
                .await
                .map_err(|e| ClientError::ParseError(e.to_string()))
        })
        .await?;

        if !response.success {
            return Err(ClientError::Rejected(
                response.error.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        response
            .data
            .ok_or_else(|| ClientError::InvalidResponse("missing data".to_string()))
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Peer RPC errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("initialization error: {0}")]
    InitError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("HTTP error ({status}): {message}")]
    HttpError { status: u16, message: String },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("peer rejected request: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(GridClient::new(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_descriptor_from_instance() {
        let instance = Instance::new("s1:7331", "tok");
        let descriptor = InstanceDescriptor::from(&instance);
        assert_eq!(descriptor.url.as_deref(), Some("s1:7331"));
        assert_eq!(descriptor.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let ok = ApiResponse::ok(true);
        let raw = serde_json::to_string(&ok).unwrap();
        let parsed: ApiResponse<bool> = serde_json::from_str(&raw).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.data, Some(true));

        let err: ApiResponse<bool> = ApiResponse::err("nope");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_network_error() {
        let client = GridClient::new(Duration::from_millis(200))
            .unwrap()
            .with_retry(RetryConfig::none());
        let target = Instance::new("127.0.0.1:1", "t");

        let result = client.run(&target).await;
        assert!(matches!(result, Err(ClientError::NetworkError(_))));
    }
}
