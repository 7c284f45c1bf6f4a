//! Maintenance silences and firing alerts.

pub mod alertmanager;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

pub use alertmanager::AlertmanagerClient;

/// Alert-silencing windows opened around the disruptive parts of an upgrade.
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Silence non-critical alerts, plus the named critical alerts, until `ends_at`.
    async fn start_control_plane(
        &self,
        ends_at: DateTime<Utc>,
        version: &str,
        ignored_alerts: &[String],
    ) -> Result<()>;

    /// Silence worker disruption until `ends_at`. A changed `pending` count
    /// replaces the previous worker silence.
    async fn set_worker(&self, ends_at: DateTime<Utc>, version: &str, pending: i32) -> Result<()>;

    async fn end_control_plane(&self) -> Result<()>;

    async fn end_worker(&self) -> Result<()>;

    /// Whether any silence created by the operator is active.
    async fn is_active(&self) -> Result<bool>;
}

/// A firing alert, reduced to the labels the health checks look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alert {
    pub name: String,
    pub namespace: Option<String>,
    pub severity: Option<String>,
}

#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Critical alerts currently firing and neither silenced nor inhibited.
    async fn firing_critical_alerts(&self) -> Result<Vec<Alert>>;
}

/// Used when no Alertmanager is configured: nothing is silenced and no
/// alerts are reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMaintenance;

#[async_trait]
impl Maintenance for NoopMaintenance {
    async fn start_control_plane(
        &self,
        ends_at: DateTime<Utc>,
        version: &str,
        _ignored_alerts: &[String],
    ) -> Result<()> {
        info!(version, ends_at = %ends_at, "Alertmanager disabled, skipping control plane silence");
        Ok(())
    }

    async fn set_worker(&self, ends_at: DateTime<Utc>, version: &str, pending: i32) -> Result<()> {
        info!(version, pending, ends_at = %ends_at, "Alertmanager disabled, skipping worker silence");
        Ok(())
    }

    async fn end_control_plane(&self) -> Result<()> {
        Ok(())
    }

    async fn end_worker(&self) -> Result<()> {
        Ok(())
    }

    async fn is_active(&self) -> Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl AlertSource for NoopMaintenance {
    async fn firing_critical_alerts(&self) -> Result<Vec<Alert>> {
        Ok(Vec::new())
    }
}
