//! Reachability checks for services the upgrade depends on.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::HttpAvailabilityConfig;
use crate::error::CuoError;

/// Checks every configured URL with a GET. All of them must answer 2xx.
pub struct HttpAvailability {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpAvailability {
    pub fn new(config: &HttpAvailabilityConfig) -> Result<Self> {
        let timeout = Duration::from_secs(u64::try_from(config.timeout.max(1)).unwrap_or(10));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build availability check HTTP client")?;
        Ok(Self {
            client,
            urls: config.urls.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    async fn check_url(&self, url: &str) -> Result<(), String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("{url}: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{url}: returned {status}"));
        }
        debug!(url, %status, "Dependency reachable");
        Ok(())
    }

    /// Check all URLs concurrently.
    pub async fn check(&self) -> Result<()> {
        let results = join_all(self.urls.iter().map(|url| self.check_url(url))).await;
        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            info!(targets = self.urls.len(), "External dependencies are available");
            return Ok(());
        }
        warn!(failed = failures.len(), "External dependency availability check failed");
        Err(CuoError::HealthCheck(format!(
            "external dependencies unavailable: {}",
            failures.join("; ")
        ))
        .into())
    }
}
