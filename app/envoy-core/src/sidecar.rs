//! Client for the in-sleeve sidecar daemons.
//!
//! Each sleeve runs a small HTTP daemon on port 8080 exposing
//! introspection. The client fans a batch of fetches out concurrently;
//! targets that fail or time out are silently omitted, which is how
//! sidecar liveness is inferred downstream.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use envoy_protocol::SidecarStatus;
use std::collections::HashMap;
use std::time::Duration;

const SIDECAR_PORT: u16 = 8080;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Batched sidecar status fetch, as consumed by the status broadcaster.
#[async_trait]
pub trait SidecarStatusSource: Send + Sync {
    /// Fetches `/status` from every named container in parallel and
    /// returns only the successful responses.
    async fn batch_status(&self, container_names: &[String]) -> HashMap<String, SidecarStatus>;
}

/// HTTP client for sleeve sidecars.
pub struct SidecarClient {
    http: reqwest::Client,
}

impl SidecarClient {
    /// Creates a client with the per-request timeout applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoreError::external(format!("sidecar client: {e}")))?;
        Ok(Self { http })
    }

    /// Fetches status from one sleeve's sidecar.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, times out, or the response
    /// is not decodable.
    pub async fn status(&self, container_name: &str) -> Result<SidecarStatus> {
        let url = format!("http://{container_name}:{SIDECAR_PORT}/status");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::external(format!("sidecar request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::external(format!(
                "sidecar returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoreError::external(format!("failed to decode sidecar response: {e}")))
    }

    /// Checks whether a sleeve's sidecar responds on `/health`.
    pub async fn health(&self, container_name: &str) -> bool {
        let url = format!("http://{container_name}:{SIDECAR_PORT}/health");
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SidecarStatusSource for SidecarClient {
    async fn batch_status(&self, container_names: &[String]) -> HashMap<String, SidecarStatus> {
        let fetches = container_names.iter().map(|name| async move {
            let status = self.status(name).await.ok()?;
            Some((name.clone(), status))
        });

        futures_util::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
