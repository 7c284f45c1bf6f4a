//! Cluster upgrader: step lists per cluster flavour and the upgrade-window
//! failure policy.

pub mod availability;
pub mod health;
mod steps;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::clusterversion::has_upgrade_commenced;
use crate::config::UpgraderConfig;
use crate::crd::{
    ConditionStatus, UpgradeCondition, UpgradeConfig, UpgradePhase, UpgradeType, step,
};
use crate::maintenance::{AlertSource, Maintenance};
use crate::metrics::Metrics;
use crate::notify::{Notifier, NotifyState, UpgradeEvent};
use crate::scaler::ensure_scale_down_nodes;
use crate::steps::{Step, StepRunner};
use crate::store::ClusterStore;

use availability::HttpAvailability;

/// A step bound to the upgrader's collaborators.
pub type UpgradeStep = Step<ClusterUpgrader>;

/// What happens when an upgrade never gets going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Fail the upgrade once the upgrade window has passed without the
    /// ClusterVersion being pointed at the desired release.
    UpgradeWindow,
    /// Keep trying for as long as it takes.
    None,
}

impl FailurePolicy {
    pub const fn for_type(upgrade_type: UpgradeType) -> Self {
        match upgrade_type {
            UpgradeType::Osd => Self::UpgradeWindow,
            UpgradeType::Aro => Self::None,
        }
    }
}

/// External systems the upgrader talks to.
pub struct Collaborators {
    pub store: Arc<dyn ClusterStore>,
    pub maintenance: Arc<dyn Maintenance>,
    pub alerts: Arc<dyn AlertSource>,
    pub notifier: Arc<dyn Notifier>,
    pub metrics: Arc<Metrics>,
}

pub struct ClusterUpgrader {
    store: Arc<dyn ClusterStore>,
    maintenance: Arc<dyn Maintenance>,
    alerts: Arc<dyn AlertSource>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    availability: HttpAvailability,
    config: UpgraderConfig,
    runner: StepRunner,
    osd_steps: Vec<UpgradeStep>,
    aro_steps: Vec<UpgradeStep>,
}

impl ClusterUpgrader {
    pub fn new(collaborators: Collaborators, config: UpgraderConfig) -> Result<Self> {
        let Collaborators {
            store,
            maintenance,
            alerts,
            notifier,
            metrics,
        } = collaborators;
        let availability = HttpAvailability::new(&config.ext_dependency_availability_check.http)?;
        let runner = StepRunner::new(store.clone(), metrics.clone());
        Ok(Self {
            store,
            maintenance,
            alerts,
            notifier,
            metrics,
            availability,
            config,
            runner,
            osd_steps: steps::steps_for(UpgradeType::Osd),
            aro_steps: steps::steps_for(UpgradeType::Aro),
        })
    }

    pub fn steps(&self, upgrade_type: UpgradeType) -> &[UpgradeStep] {
        match upgrade_type {
            UpgradeType::Osd => &self.osd_steps,
            UpgradeType::Aro => &self.aro_steps,
        }
    }

    /// Drive the upgrade towards the desired version as far as it can go in
    /// one pass.
    pub async fn upgrade(&self, uc: &mut UpgradeConfig) -> Result<UpgradePhase> {
        let upgrade_type = uc.spec.upgrade_type;
        if FailurePolicy::for_type(upgrade_type) == FailurePolicy::UpgradeWindow {
            match self.should_fail_upgrade(uc, Utc::now()).await {
                Ok(true) => return self.perform_upgrade_failure(uc).await,
                Ok(false) => {}
                Err(e) => warn!(
                    version = uc.desired_version(),
                    error = %e,
                    "Could not evaluate the upgrade window, running steps"
                ),
            }
        }
        self.runner.run(self, uc, self.steps(upgrade_type)).await
    }

    /// The upgrade window has passed and the cluster was never told to move.
    async fn should_fail_upgrade(&self, uc: &UpgradeConfig, now: DateTime<Utc>) -> Result<bool> {
        let window = self.config.upgrade_window.timeout_duration();
        if window <= chrono::Duration::zero() {
            return Ok(false);
        }
        if has_upgrade_commenced(self.store.as_ref(), uc).await? {
            return Ok(false);
        }
        let start = uc
            .status
            .as_ref()
            .and_then(|s| s.history(uc.desired_version()))
            .and_then(|h| h.start_time);
        let Some(start) = start else {
            return Ok(false);
        };
        let breached = start + window < now;
        if breached {
            warn!(
                version = uc.desired_version(),
                started = %start,
                window_minutes = window.num_minutes(),
                "Upgrade window breached before the upgrade commenced"
            );
        }
        Ok(breached)
    }

    /// Undo what can be undone, tell the owner and mark the upgrade Failed.
    ///
    /// The phase only moves to Failed once the notification went out, so a
    /// failed notification is retried on the next pass.
    async fn perform_upgrade_failure(&self, uc: &mut UpgradeConfig) -> Result<UpgradePhase> {
        let version = uc.desired_version().to_string();
        let mut condition = UpgradeCondition::new(
            step::FAILED_UPGRADE,
            ConditionStatus::False,
            "Upgrade failed",
            "FailedUpgrade notification sent",
        );

        if let Err(e) = ensure_scale_down_nodes(self.store.as_ref(), None, Utc::now()).await {
            warn!(version = %version, error = %e, "Failed to remove extra upgrade capacity");
        }

        let description = format!(
            "Upgrade to version {version} failed: the upgrade window passed before it could start"
        );
        uc.status
            .get_or_insert_with(Default::default)
            .ensure_history(&version);
        let phase = match self.notify(uc, NotifyState::Failed, description).await {
            Err(e) => {
                error!(version = %version, error = %e, "Failed to send upgrade failure notification");
                condition.message = format!("FailedUpgrade notification failed: {e}");
                history_phase(uc, &version)
            }
            Ok(()) => {
                self.metrics.set_upgrade_window_breached(&version, true);
                condition.status = ConditionStatus::True;
                UpgradePhase::Failed
            }
        };

        let now = Utc::now();
        let history = uc
            .status
            .get_or_insert_with(Default::default)
            .ensure_history(&version);
        history.set_condition(condition, now);
        if phase == UpgradePhase::Failed {
            history.phase = UpgradePhase::Failed;
            history.complete_time = Some(now);
            info!(version = %version, "Upgrade marked as failed");
        }
        self.store.patch_upgrade_config_status(uc).await?;
        Ok(phase)
    }

    async fn notify(
        &self,
        uc: &UpgradeConfig,
        state: NotifyState,
        description: String,
    ) -> Result<()> {
        let event = UpgradeEvent::new(state, uc.name_any(), uc.desired_version(), description);
        self.notifier.notify(&event).await
    }
}

fn history_phase(uc: &UpgradeConfig, version: &str) -> UpgradePhase {
    uc.status
        .as_ref()
        .and_then(|s| s.history(version))
        .map_or(UpgradePhase::Upgrading, |h| h.phase)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use prometheus_client::registry::Registry;

    use super::{ClusterUpgrader, Collaborators};
    use crate::config::UpgraderConfig;
    use crate::metrics::Metrics;
    use crate::testing::{FakeAlerts, FakeMaintenance, FakeStore, RecordingNotifier};

    /// An upgrader wired to in-memory collaborators.
    pub struct Harness {
        pub store: Arc<FakeStore>,
        pub maintenance: Arc<FakeMaintenance>,
        pub notifier: Arc<RecordingNotifier>,
        pub metrics: Arc<Metrics>,
        pub registry: Registry,
        pub upgrader: ClusterUpgrader,
    }

    impl Harness {
        pub fn config() -> UpgraderConfig {
            UpgraderConfig::default()
        }

        pub fn new() -> Self {
            Self::with_config(Self::config())
        }

        pub fn with_config(config: UpgraderConfig) -> Self {
            let store = Arc::new(FakeStore::new());
            let maintenance = Arc::new(FakeMaintenance::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let mut registry = Registry::default();
            let metrics = Arc::new(Metrics::new(&mut registry));
            let upgrader = ClusterUpgrader::new(
                Collaborators {
                    store: store.clone(),
                    maintenance: maintenance.clone(),
                    alerts: Arc::new(FakeAlerts::new(Vec::new())),
                    notifier: notifier.clone(),
                    metrics: metrics.clone(),
                },
                config,
            )
            .unwrap();
            Self {
                store,
                maintenance,
                notifier,
                metrics,
                registry,
                upgrader,
            }
        }
    }
}
