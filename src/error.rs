//! Custom error types for cuo.

use std::fmt;

use thiserror::Error;

/// Errors that can occur while driving a managed cluster upgrade.
#[derive(Error, Debug)]
pub enum CuoError {
    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Scale timeout: {0}")]
    ScaleTimeout(String),

    #[error("Node {node} drain timed out")]
    DrainTimeout { node: String },

    #[error(transparent)]
    Pods(#[from] PodErrors),

    #[error("Maintenance error: {0}")]
    Maintenance(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Upgrade source error: {0}")]
    UpgradeSource(String),
}

impl CuoError {
    /// Wrap a `kube` client error with some context about the call that failed.
    pub fn kube(context: &str, err: &kube::Error) -> Self {
        if let kube::Error::Api(resp) = err
            && resp.code == 404
        {
            return Self::NotFound(format!("{context}: {}", resp.message));
        }
        Self::KubernetesApi(format!("{context}: {err}"))
    }

    /// Returns true if this error is transient and should be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::KubernetesApi(_) | Self::Maintenance(_) | Self::Notification(_))
    }

    /// Node name carried by a drain timeout, if this is one.
    pub fn drain_timeout_node(&self) -> Option<&str> {
        match self {
            Self::DrainTimeout { node } => Some(node),
            _ => None,
        }
    }

    pub const fn is_scale_timeout(&self) -> bool {
        matches!(self, Self::ScaleTimeout(_))
    }
}

/// Find a [`CuoError`] anywhere in an `anyhow` chain.
pub fn find_cuo_error(err: &anyhow::Error) -> Option<&CuoError> {
    err.chain().find_map(|e| e.downcast_ref::<CuoError>())
}

/// Aggregated failures from a best-effort operation over many pods.
#[derive(Debug, Default)]
pub struct PodErrors {
    errors: Vec<String>,
}

impl PodErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `Ok(())` when nothing failed, otherwise the combined error.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for PodErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s) occurred: {}",
            self.errors.len(),
            self.errors.join("; ")
        )
    }
}

impl std::error::Error for PodErrors {}
