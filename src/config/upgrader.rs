//! Upgrader configuration loaded from YAML.
//!
//! All time values are expressed in minutes except the HTTP availability check
//! timeout, which is in seconds.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CuoError;

/// Feature gate for the extended pre-upgrade health check, which also looks at
/// cordoned nodes, PDBs and capacity and reports every failure at once.
pub const PRE_HEALTH_CHECK_FEATURE_GATE: &str = "PreHealthCheck";

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgraderConfig {
    pub maintenance: MaintenanceConfig,
    pub scale: ScaleConfig,
    pub node_drain: NodeDrainConfig,
    pub health_check: HealthCheckConfig,
    #[serde(rename = "extDependencyAvailabilityChecks")]
    pub ext_dependency_availability_check: AvailabilityCheckConfig,
    pub upgrade_window: UpgradeWindowConfig,
    pub environment: EnvironmentConfig,
    pub feature_gate: FeatureGateConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct MaintenanceConfig {
    pub control_plane_time: i64,
    pub ignored_alerts: IgnoredAlerts,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            control_plane_time: 60,
            ignored_alerts: IgnoredAlerts::default(),
        }
    }
}

/// Critical alerts that are expected to fire while the control plane rolls.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct IgnoredAlerts {
    pub control_plane_criticals: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleConfig {
    #[serde(rename = "timeOut")]
    pub timeout: i64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self { timeout: 30 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeDrainConfig {
    #[serde(rename = "timeOut")]
    pub timeout: i64,
    pub expected_node_drain_time: i64,
    /// Regexes for namespaces whose pods are never touched by a drain.
    pub ignored_namespace_patterns: Vec<String>,
}

impl Default for NodeDrainConfig {
    fn default() -> Self {
        Self {
            timeout: 45,
            expected_node_drain_time: 8,
            ignored_namespace_patterns: Vec::new(),
        }
    }
}

impl NodeDrainConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::minutes(self.timeout)
    }

    pub fn expected_drain_duration(&self) -> Duration {
        Duration::minutes(self.expected_node_drain_time)
    }

    /// Compile the ignored namespace patterns.
    pub fn ignored_namespace_regexes(&self) -> Result<Vec<Regex>, CuoError> {
        self.ignored_namespace_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    CuoError::InvalidConfig(format!("ignored namespace pattern {p:?}: {e}"))
                })
            })
            .collect()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckConfig {
    pub ignored_criticals: Vec<String>,
    pub ignored_namespaces: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AvailabilityCheckConfig {
    pub http: HttpAvailabilityConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpAvailabilityConfig {
    /// Per-request timeout in seconds.
    pub timeout: i64,
    pub urls: Vec<String>,
}

impl Default for HttpAvailabilityConfig {
    fn default() -> Self {
        Self {
            timeout: 10,
            urls: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeWindowConfig {
    #[serde(rename = "timeOut")]
    pub timeout: i64,
    pub delay_trigger: i64,
}

impl Default for UpgradeWindowConfig {
    fn default() -> Self {
        Self {
            timeout: 120,
            delay_trigger: 30,
        }
    }
}

impl UpgradeWindowConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::minutes(self.timeout)
    }

    pub fn delay_trigger_duration(&self) -> Duration {
        Duration::minutes(self.delay_trigger)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentConfig {
    pub fedramp: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureGateConfig {
    pub enabled: Vec<String>,
}

impl UpgraderConfig {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = Self::from_yaml(&raw)?;
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(raw).context("Failed to parse upgrader config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CuoError> {
        if self.maintenance.control_plane_time <= 0 {
            return Err(CuoError::InvalidConfig(
                "maintenance controlPlaneTime is invalid".into(),
            ));
        }
        if self.scale.timeout <= 0 {
            return Err(CuoError::InvalidConfig("scale timeOut is invalid".into()));
        }
        if self.node_drain.timeout <= 0 {
            return Err(CuoError::InvalidConfig(
                "nodeDrain timeOut is invalid".into(),
            ));
        }
        if self.node_drain.expected_node_drain_time <= 0 {
            return Err(CuoError::InvalidConfig(
                "nodeDrain expectedNodeDrainTime is invalid".into(),
            ));
        }
        if self.upgrade_window.delay_trigger < 0 {
            return Err(CuoError::InvalidConfig(
                "upgradeWindow delayTrigger is invalid".into(),
            ));
        }
        if self.upgrade_window.timeout < 0 {
            return Err(CuoError::InvalidConfig(
                "upgradeWindow timeOut is invalid".into(),
            ));
        }
        let http = &self.ext_dependency_availability_check.http;
        if !http.urls.is_empty() && !(1..=60).contains(&http.timeout) {
            return Err(CuoError::InvalidConfig(
                "HTTP availability timeout must be between 1 and 60 seconds".into(),
            ));
        }
        self.node_drain.ignored_namespace_regexes()?;
        Ok(())
    }

    pub fn is_feature_enabled(&self, feature: &str) -> bool {
        self.feature_gate.enabled.iter().any(|f| f == feature)
    }

    pub fn control_plane_duration(&self) -> Duration {
        Duration::minutes(self.maintenance.control_plane_time)
    }

    pub fn scale_duration(&self) -> Duration {
        Duration::minutes(self.scale.timeout)
    }
}
