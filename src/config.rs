//! Operator command-line configuration.

pub mod upgrader;

use clap::Parser;

pub use upgrader::{
    HealthCheckConfig, HttpAvailabilityConfig, NodeDrainConfig, PRE_HEALTH_CHECK_FEATURE_GATE,
    UpgraderConfig,
};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cuo",
    version,
    about = "Cluster Upgrade Operator for managed OpenShift clusters"
)]
pub struct Config {
    /// Path to the upgrader YAML configuration
    #[arg(long, env = "CUO_CONFIG_PATH", default_value = "/etc/cuo/config.yaml")]
    pub config_path: String,

    /// Namespace holding the UpgradeConfig resources
    #[arg(
        long,
        env = "OPERATOR_NAMESPACE",
        default_value = "openshift-managed-upgrade-operator"
    )]
    pub operator_namespace: String,

    /// Port for /healthz and /readyz
    #[arg(long, env = "HEALTH_PORT", default_value = "8080")]
    pub health_port: u16,

    /// Port for /metrics
    #[arg(long, env = "METRICS_PORT", default_value = "8081")]
    pub metrics_port: u16,

    /// Slack incoming webhook; notifications are only logged when unset
    #[arg(long, env = "SLACK_WEBHOOK_URL")]
    pub slack_webhook_url: Option<String>,

    /// Alertmanager base URL used for silences and firing alerts
    #[arg(long, env = "ALERTMANAGER_URL")]
    pub alertmanager_url: Option<String>,

    /// Bearer token for Alertmanager
    #[arg(long, env = "ALERTMANAGER_TOKEN", hide_env_values = true)]
    pub alertmanager_token: Option<String>,

    /// How often the node keeper re-checks cordoned nodes
    #[arg(long, env = "NODEKEEPER_INTERVAL_SECONDS", default_value = "60")]
    pub nodekeeper_interval_seconds: u64,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn display(&self) {
        tracing::info!(
            config_path = %self.config_path,
            operator_namespace = %self.operator_namespace,
            health_port = self.health_port,
            metrics_port = self.metrics_port,
            slack = self.slack_webhook_url.is_some(),
            alertmanager = self.alertmanager_url.as_deref().unwrap_or("disabled"),
            log_format = %self.log_format,
            log_level = %self.log_level,
            "Configuration initialized"
        );

        if self.alertmanager_url.is_none() {
            tracing::warn!("No Alertmanager URL configured, maintenance silences are disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::try_parse_from(["cuo"]).unwrap();
        assert_eq!(cfg.config_path, "/etc/cuo/config.yaml");
        assert_eq!(cfg.operator_namespace, "openshift-managed-upgrade-operator");
        assert_eq!(cfg.health_port, 8080);
        assert_eq!(cfg.metrics_port, 8081);
        assert_eq!(cfg.nodekeeper_interval_seconds, 60);
        assert!(cfg.slack_webhook_url.is_none());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "cuo",
            "--operator-namespace",
            "muo",
            "--alertmanager-url",
            "https://alertmanager.example:9094",
            "--log-format",
            "pretty",
        ])
        .unwrap();
        assert_eq!(cfg.operator_namespace, "muo");
        assert_eq!(
            cfg.alertmanager_url.as_deref(),
            Some("https://alertmanager.example:9094")
        );
        assert_eq!(cfg.log_format, "pretty");
    }
}
