//! Prometheus metrics for the cuo operator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::crd::UpgradePhase;

/// Labels for reconcile metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub upgradeconfig: String,
    pub result: String,
}

/// Labels for upgrade-level metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpgradeLabels {
    pub upgradeconfig: String,
    pub version: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub version: String,
    pub phase: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StepLabels {
    pub step: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeLabels {
    pub node: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VersionLabels {
    pub version: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub version: String,
    pub stage: String,
}

/// Outcome of a single step attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    InProgress,
    Error,
}

impl StepOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::InProgress => "in_progress",
            Self::Error => "error",
        }
    }
}

const PHASES: [UpgradePhase; 5] = [
    UpgradePhase::New,
    UpgradePhase::Pending,
    UpgradePhase::Upgrading,
    UpgradePhase::Upgraded,
    UpgradePhase::Failed,
];

type UpgradeKey = (String, String);

/// All Prometheus metrics for the operator.
pub struct Metrics {
    pub reconcile_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    pub upgrade_phase_info: Family<PhaseLabels, Gauge>,
    pub upgrade_duration_seconds: Family<UpgradeLabels, Histogram>,
    pub step_total: Family<StepLabels, Counter>,
    pub scaling_succeeded_total: Family<VersionLabels, Counter>,
    pub scaling_failed_total: Family<VersionLabels, Counter>,
    pub node_drain_failed: Family<NodeLabels, Gauge>,
    pub control_plane_timeout: Family<VersionLabels, Gauge>,
    pub worker_timeout: Family<VersionLabels, Gauge>,
    pub upgrade_window_breached: Family<VersionLabels, Gauge>,
    pub health_check_failed_total: Family<HealthCheckLabels, Counter>,
    /// When each (upgradeconfig, version) entered Upgrading.
    upgrade_start_times: Mutex<HashMap<UpgradeKey, Instant>>,
}

const RECONCILE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Whole upgrades run from minutes to several hours.
const UPGRADE_DURATION_BUCKETS: &[f64] = &[
    300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 57600.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let reconcile_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "cuo_reconcile",
            "Total number of reconcile calls",
            reconcile_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(RECONCILE_BUCKETS.iter().copied())
            });
        registry.register(
            "cuo_reconcile_duration_seconds",
            "Duration of reconcile calls in seconds",
            reconcile_duration_seconds.clone(),
        );

        let upgrade_phase_info = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "cuo_upgrade_phase_info",
            "Current upgrade phase (1=active, 0=inactive)",
            upgrade_phase_info.clone(),
        );

        let upgrade_duration_seconds =
            Family::<UpgradeLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(UPGRADE_DURATION_BUCKETS.iter().copied())
            });
        registry.register(
            "cuo_upgrade_duration_seconds",
            "Time from Upgrading to a terminal phase in seconds",
            upgrade_duration_seconds.clone(),
        );

        let step_total = Family::<StepLabels, Counter>::default();
        registry.register(
            "cuo_upgrade_step",
            "Upgrade step attempts by outcome",
            step_total.clone(),
        );

        let scaling_succeeded_total = Family::<VersionLabels, Counter>::default();
        registry.register(
            "cuo_scaling_succeeded",
            "Extra worker capacity became ready",
            scaling_succeeded_total.clone(),
        );

        let scaling_failed_total = Family::<VersionLabels, Counter>::default();
        registry.register(
            "cuo_scaling_failed",
            "Extra worker capacity did not become ready in time",
            scaling_failed_total.clone(),
        );

        let node_drain_failed = Family::<NodeLabels, Gauge>::default();
        registry.register(
            "cuo_node_drain_failed",
            "Node drain exceeded its budget (1=failed)",
            node_drain_failed.clone(),
        );

        let control_plane_timeout = Family::<VersionLabels, Gauge>::default();
        registry.register(
            "cuo_control_plane_upgrade_timeout",
            "Control plane upgrade exceeded its maintenance window (1=timed out)",
            control_plane_timeout.clone(),
        );

        let worker_timeout = Family::<VersionLabels, Gauge>::default();
        registry.register(
            "cuo_worker_upgrade_timeout",
            "Workers still upgrading after their maintenance window ended (1=timed out)",
            worker_timeout.clone(),
        );

        let upgrade_window_breached = Family::<VersionLabels, Gauge>::default();
        registry.register(
            "cuo_upgrade_window_breached",
            "Upgrade did not commence inside its window (1=breached)",
            upgrade_window_breached.clone(),
        );

        let health_check_failed_total = Family::<HealthCheckLabels, Counter>::default();
        registry.register(
            "cuo_health_check_failed",
            "Cluster health check failures",
            health_check_failed_total.clone(),
        );

        Self {
            reconcile_total,
            reconcile_duration_seconds,
            upgrade_phase_info,
            upgrade_duration_seconds,
            step_total,
            scaling_succeeded_total,
            scaling_failed_total,
            node_drain_failed,
            control_plane_timeout,
            worker_timeout,
            upgrade_window_breached,
            health_check_failed_total,
            upgrade_start_times: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_step(&self, step: &str, outcome: StepOutcome) {
        self.step_total
            .get_or_create(&StepLabels {
                step: step.to_string(),
                outcome: outcome.as_str().to_string(),
            })
            .inc();
    }

    /// Count one reconcile of `upgradeconfig` ending in `result` and record how long it took.
    pub fn observe_reconcile(&self, upgradeconfig: &str, result: &str, seconds: f64) {
        let labels = ReconcileLabels {
            upgradeconfig: upgradeconfig.to_string(),
            result: result.to_string(),
        };
        self.reconcile_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(seconds);
    }

    /// Mark `phase` active for `version` and every other phase inactive.
    pub fn set_phase(&self, version: &str, phase: UpgradePhase) {
        for p in PHASES {
            self.upgrade_phase_info
                .get_or_create(&PhaseLabels {
                    version: version.to_string(),
                    phase: p.to_string(),
                })
                .set(i64::from(p == phase));
        }
    }

    pub fn set_node_drain_failed(&self, node: &str, failed: bool) {
        self.node_drain_failed
            .get_or_create(&NodeLabels {
                node: node.to_string(),
            })
            .set(i64::from(failed));
    }

    pub fn clear_node_drain_failed(&self) {
        self.node_drain_failed.clear();
    }

    pub fn set_control_plane_timeout(&self, version: &str, timed_out: bool) {
        Self::set_flag(&self.control_plane_timeout, version, timed_out);
    }

    pub fn set_worker_timeout(&self, version: &str, timed_out: bool) {
        Self::set_flag(&self.worker_timeout, version, timed_out);
    }

    pub fn set_upgrade_window_breached(&self, version: &str, breached: bool) {
        Self::set_flag(&self.upgrade_window_breached, version, breached);
    }

    pub fn inc_scaling(&self, version: &str, succeeded: bool) {
        let family = if succeeded {
            &self.scaling_succeeded_total
        } else {
            &self.scaling_failed_total
        };
        family
            .get_or_create(&VersionLabels {
                version: version.to_string(),
            })
            .inc();
    }

    pub fn inc_health_check_failed(&self, version: &str, stage: &str) {
        self.health_check_failed_total
            .get_or_create(&HealthCheckLabels {
                version: version.to_string(),
                stage: stage.to_string(),
            })
            .inc();
    }

    fn set_flag(family: &Family<VersionLabels, Gauge>, version: &str, on: bool) {
        family
            .get_or_create(&VersionLabels {
                version: version.to_string(),
            })
            .set(i64::from(on));
    }

    /// Ensure an upgrade start time is tracked.
    /// Does nothing if an entry already exists (idempotent across reconcile loops).
    pub fn ensure_upgrade_start(&self, upgradeconfig: &str, version: &str) {
        let key = (upgradeconfig.to_string(), version.to_string());
        self.upgrade_start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(Instant::now);
    }

    /// Observe how long the upgrade ran and forget its start time.
    /// Returns None if no start time was tracked, e.g. after an operator restart.
    pub fn observe_upgrade_duration(&self, upgradeconfig: &str, version: &str) -> Option<f64> {
        let key = (upgradeconfig.to_string(), version.to_string());
        let start = self
            .upgrade_start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)?;
        let duration = start.elapsed().as_secs_f64();
        self.upgrade_duration_seconds
            .get_or_create(&UpgradeLabels {
                upgradeconfig: upgradeconfig.to_string(),
                version: version.to_string(),
            })
            .observe(duration);
        Some(duration)
    }
}

/// Axum handler that encodes the registry as OpenMetrics text.
async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buf = String::new();
    if encode(&mut buf, &registry).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }
    (StatusCode::OK, buf)
}

/// Start the metrics server on the given port.
pub async fn serve(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tracing::info;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
