//! cuo - Cluster Upgrade Operator for managed OpenShift clusters.
//!
//! Watches `UpgradeConfig` resources and walks each desired version through an
//! ordered, resumable list of upgrade steps: capacity reservation, maintenance
//! silences, health checks, the ClusterVersion hand-off and timed node drains.

mod clusterversion;
mod config;
mod controller;
mod crd;
mod drain;
mod error;
mod health;
mod logging;
mod machinery;
mod maintenance;
mod metrics;
mod nodekeeper;
mod notify;
mod scaler;
mod status;
mod steps;
mod store;
mod upgrader;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures::StreamExt;
use kube::Api;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use secrecy::SecretString;
use tracing::{error, info};

use config::{Config, UpgraderConfig};
use controller::Context;
use crd::UpgradeConfig;
use maintenance::{AlertSource, AlertmanagerClient, Maintenance, NoopMaintenance};
use nodekeeper::NodeKeeper;
use notify::{LogNotifier, Notifier, SlackNotifier};
use store::{ClusterStore, KubeStore};
use upgrader::{ClusterUpgrader, Collaborators};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

#[tokio::main]
async fn main() {
    let config = Config::from_args();

    if let Err(e) = logging::init(&config.log_format, &config.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(
        version = VERSION,
        commit = COMMIT,
        build_date = BUILD_DATE,
        "Starting cuo"
    );
    config.display();

    if let Err(e) = run(config).await {
        error!(error = %e, "Operator failed");
        std::process::exit(1);
    }
}

/// Main operator loop.
async fn run(config: Config) -> Result<()> {
    let upgrader_config = UpgraderConfig::load(&config.config_path)
        .with_context(|| format!("Failed to load upgrader config from {}", config.config_path))?;
    upgrader_config.validate()?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = Arc::new(metrics::Metrics::new(&mut registry));
    let registry = Arc::new(registry);

    let health_state = health::HealthState::new();
    let health_clone = health_state.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_clone).await {
            error!(error = %e, "Health server failed");
        }
    });

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_port, registry).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    let store: Arc<dyn ClusterStore> =
        Arc::new(KubeStore::new(client.clone(), &config.operator_namespace));

    let (maintenance, alerts): (Arc<dyn Maintenance>, Arc<dyn AlertSource>) =
        match config.alertmanager_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => {
                let token = config.alertmanager_token.clone().map(SecretString::from);
                let am = Arc::new(AlertmanagerClient::new(url, token));
                (am.clone() as Arc<dyn Maintenance>, am as Arc<dyn AlertSource>)
            }
            None => (
                Arc::new(NoopMaintenance) as Arc<dyn Maintenance>,
                Arc::new(NoopMaintenance) as Arc<dyn AlertSource>,
            ),
        };

    let notifier: Arc<dyn Notifier> =
        match config.slack_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => {
                info!("Slack notifications enabled");
                Arc::new(SlackNotifier::new(SecretString::from(url.to_string())))
            }
            None => Arc::new(LogNotifier),
        };

    let keeper = NodeKeeper::new(
        store.clone(),
        metrics.clone(),
        upgrader_config.node_drain.clone(),
        Duration::from_secs(config.nodekeeper_interval_seconds),
    );
    tokio::spawn(keeper.run());

    let upgrader = ClusterUpgrader::new(
        Collaborators {
            store: store.clone(),
            maintenance,
            alerts,
            notifier,
            metrics: metrics.clone(),
        },
        upgrader_config,
    )?;

    let api: Api<UpgradeConfig> = Api::namespaced(client.clone(), &config.operator_namespace);
    let ctx = Arc::new(Context {
        kube_client: client,
        store,
        upgrader: Arc::new(upgrader),
        metrics,
    });

    health_state.set_ready(true);

    info!(namespace = %config.operator_namespace, "Starting UpgradeConfig controller");
    Controller::new(api, WatcherConfig::default())
        .run(controller::reconcile, controller::error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled: {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    Ok(())
}
