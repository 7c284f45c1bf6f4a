//! The upgrade steps.
//!
//! Each step re-reads the cluster before acting, so running it again after a
//! crash or a failed attempt is harmless.

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use super::{ClusterUpgrader, UpgradeStep, health};
use crate::clusterversion::{
    current_version, ensure_desired_config, has_upgrade_commenced, has_upgrade_completed,
    update_started_at,
};
use crate::config::PRE_HEALTH_CHECK_FEATURE_GATE;
use crate::crd::{UpgradeConfig, UpgradeType, step};
use crate::drain::{DrainProfile, NodeDrain};
use crate::error::{CuoError, find_cuo_error};
use crate::machinery::{WORKER_POOL, is_upgrading};
use crate::notify::NotifyState;
use crate::scaler::{can_scale, ensure_scale_down_nodes, ensure_scale_up_nodes};

const UPGRADEABLE: &str = "Upgradeable";

/// Steps that only exist on OSD clusters.
const OSD_ONLY: [&str; 3] = [
    step::UPGRADE_DELAYED_CHECK,
    step::IS_CLUSTER_UPGRADABLE,
    step::POST_UPGRADE_PROCEDURES,
];

/// Ordered steps for a cluster flavour.
pub(super) fn steps_for(upgrade_type: UpgradeType) -> Vec<UpgradeStep> {
    let all = vec![
        UpgradeStep::new(step::SEND_STARTED_NOTIFICATION, |u, uc| {
            Box::pin(u.send_started_notification(uc))
        }),
        UpgradeStep::new(step::UPGRADE_DELAYED_CHECK, |u, uc| {
            Box::pin(u.upgrade_delayed_check(uc))
        }),
        UpgradeStep::new(step::IS_CLUSTER_UPGRADABLE, |u, uc| {
            Box::pin(u.is_cluster_upgradable(uc))
        }),
        UpgradeStep::new(step::PRE_HEALTH_CHECK, |u, uc| {
            Box::pin(u.pre_upgrade_health_check(uc))
        }),
        UpgradeStep::new(step::EXT_DEP_AVAILABILITY_CHECK, |u, uc| {
            Box::pin(u.external_dependency_availability_check(uc))
        }),
        UpgradeStep::new(step::SCALE_UP_EXTRA_NODES, |u, uc| {
            Box::pin(u.ensure_extra_upgrade_workers(uc))
        }),
        UpgradeStep::new(step::CONTROL_PLANE_MAINT_WINDOW, |u, uc| {
            Box::pin(u.create_control_plane_maint_window(uc))
        }),
        UpgradeStep::new(step::COMMENCE_UPGRADE, |u, uc| Box::pin(u.commence_upgrade(uc))),
        UpgradeStep::new(step::CONTROL_PLANE_UPGRADED, |u, uc| {
            Box::pin(u.control_plane_upgraded(uc))
        }),
        UpgradeStep::new(step::REMOVE_CONTROL_PLANE_MAINT_WINDOW, |u, _uc| {
            Box::pin(u.remove_control_plane_maint_window())
        }),
        UpgradeStep::new(step::WORKERS_MAINT_WINDOW, |u, uc| {
            Box::pin(u.create_worker_maint_window(uc))
        }),
        UpgradeStep::new(step::ALL_WORKER_NODES_UPGRADED, |u, uc| {
            Box::pin(u.all_workers_upgraded(uc))
        }),
        UpgradeStep::new(step::REMOVE_EXTRA_SCALED_NODES, |u, uc| {
            Box::pin(u.remove_extra_scaled_nodes(uc))
        }),
        UpgradeStep::new(step::REMOVE_MAINT_WINDOW, |u, _uc| {
            Box::pin(u.remove_maint_window())
        }),
        UpgradeStep::new(step::POST_CLUSTER_HEALTH_CHECK, |u, uc| {
            Box::pin(u.post_upgrade_health_check(uc))
        }),
        UpgradeStep::new(step::POST_UPGRADE_PROCEDURES, |u, _uc| {
            Box::pin(u.post_upgrade_procedures())
        }),
        UpgradeStep::new(step::SEND_COMPLETED_NOTIFICATION, |u, uc| {
            Box::pin(u.send_completed_notification(uc))
        }),
    ];

    match upgrade_type {
        UpgradeType::Osd => all,
        UpgradeType::Aro => all
            .into_iter()
            .filter(|s| !OSD_ONLY.contains(&s.name))
            .collect(),
    }
}

/// Second component of a dotted version.
fn minor(version: &str) -> Option<&str> {
    version.split('.').nth(1)
}

impl ClusterUpgrader {
    async fn commenced(&self, uc: &UpgradeConfig, name: &str) -> Result<bool> {
        let commenced = has_upgrade_commenced(self.store.as_ref(), uc).await?;
        if commenced {
            info!(step = name, "Upgrade already commenced, skipping step");
        }
        Ok(commenced)
    }

    async fn send_started_notification(&self, uc: &UpgradeConfig) -> Result<bool> {
        if self.commenced(uc, step::SEND_STARTED_NOTIFICATION).await? {
            return Ok(true);
        }
        let description = format!(
            "Cluster is being upgraded to version {}",
            uc.desired_version()
        );
        self.notify(uc, NotifyState::Started, description).await?;
        Ok(true)
    }

    /// Warn the owner once the upgrade has been pending for longer than the
    /// delay trigger.
    async fn upgrade_delayed_check(&self, uc: &UpgradeConfig) -> Result<bool> {
        if has_upgrade_commenced(self.store.as_ref(), uc).await? {
            return Ok(true);
        }
        let Some(history) = uc
            .status
            .as_ref()
            .and_then(|s| s.history(uc.desired_version()))
        else {
            return Ok(false);
        };

        let trigger = self.config.upgrade_window.delay_trigger_duration();
        if let Some(start) = history.start_time
            && trigger > chrono::Duration::zero()
            && start + trigger < Utc::now()
        {
            warn!(version = uc.desired_version(), "Upgrade start is delayed");
            let description = format!(
                "Upgrade to version {} has not started {} minutes after it was scheduled",
                uc.desired_version(),
                trigger.num_minutes()
            );
            self.notify(uc, NotifyState::Delayed, description).await?;
        }
        Ok(true)
    }

    /// A blocked `Upgradeable` condition only holds back minor version bumps.
    async fn is_cluster_upgradable(&self, uc: &UpgradeConfig) -> Result<bool> {
        if self.commenced(uc, step::IS_CLUSTER_UPGRADABLE).await? {
            return Ok(true);
        }
        let cv = self.store.get_cluster_version().await?;
        let Some(condition) = cv.condition(UPGRADEABLE) else {
            return Ok(true);
        };
        if condition.status != "False" {
            return Ok(true);
        }

        let desired = uc.desired_version();
        let current = current_version(&cv).unwrap_or_default();
        if minor(current).is_some() && minor(current) == minor(desired) {
            info!(current, desired, "Cluster not upgradeable but this is a patch update");
            return Ok(true);
        }
        Err(CuoError::HealthCheck(format!(
            "cluster is not upgradeable from {current} to {desired}: {}",
            condition.message.as_deref().unwrap_or("no reason given")
        ))
        .into())
    }

    /// Critical alerts and cluster operators, failing on the first problem.
    async fn basic_health_check(&self, version: &str, stage: &str) -> Result<()> {
        let result = async {
            health::critical_alerts(self.alerts.as_ref(), &self.config.health_check).await?;
            health::cluster_operators(self.store.as_ref()).await
        }
        .await;
        if result.is_err() {
            self.metrics.inc_health_check_failed(version, stage);
        }
        result
    }

    /// With the pre-health-check feature gate on, every check runs and all
    /// failures are reported together.
    async fn pre_upgrade_health_check(&self, uc: &UpgradeConfig) -> Result<bool> {
        if self.commenced(uc, step::PRE_HEALTH_CHECK).await? {
            return Ok(true);
        }
        let version = uc.desired_version();
        if !self.config.is_feature_enabled(PRE_HEALTH_CHECK_FEATURE_GATE) {
            self.basic_health_check(version, "pre").await?;
            return Ok(true);
        }

        let store = self.store.as_ref();
        let mut checks = vec![
            (
                "CriticalAlerts",
                health::critical_alerts(self.alerts.as_ref(), &self.config.health_check).await,
            ),
            ("ClusterOperators", health::cluster_operators(store).await),
            ("CordonedNodes", health::cordoned_nodes(store).await),
            ("PodDisruptionBudgets", health::pdbs(store).await),
        ];
        if uc.spec.capacity_reservation {
            let capacity = match can_scale(store).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(CuoError::HealthCheck(
                    "no worker machineset to reserve capacity from".into(),
                )
                .into()),
                Err(e) => Err(e),
            };
            checks.push(("CapacityReservation", capacity));
        }

        let mut failed = Vec::new();
        for (name, result) in &checks {
            if let Err(e) = result {
                warn!(check = *name, version, error = %e, "Pre-upgrade health check failed");
                failed.push(*name);
            }
        }
        if failed.is_empty() {
            info!(version, "Pre-upgrade health checks passed");
            return Ok(true);
        }
        self.metrics.inc_health_check_failed(version, "pre");
        Err(CuoError::HealthCheck(format!(
            "upgrade may be delayed by failing checks: {}",
            failed.join(", ")
        ))
        .into())
    }

    async fn external_dependency_availability_check(&self, uc: &UpgradeConfig) -> Result<bool> {
        if self.commenced(uc, step::EXT_DEP_AVAILABILITY_CHECK).await? {
            return Ok(true);
        }
        if self.availability.is_empty() {
            info!("No external dependencies configured for availability checks");
            return Ok(true);
        }
        self.availability.check().await?;
        Ok(true)
    }

    /// A scale-up that does not become ready in time is given up on: the
    /// upgrade goes ahead without the extra capacity.
    async fn ensure_extra_upgrade_workers(&self, uc: &UpgradeConfig) -> Result<bool> {
        if !uc.spec.capacity_reservation {
            info!("Capacity reservation disabled, not scaling up extra nodes");
            return Ok(true);
        }
        if self.commenced(uc, step::SCALE_UP_EXTRA_NODES).await? {
            return Ok(true);
        }
        if !can_scale(self.store.as_ref()).await? {
            info!("No worker machinesets to scale");
            return Ok(true);
        }

        let version = uc.desired_version();
        match ensure_scale_up_nodes(self.store.as_ref(), self.config.scale_duration(), Utc::now())
            .await
        {
            Ok(scaled) => {
                if scaled {
                    self.metrics.inc_scaling(version, true);
                }
                Ok(scaled)
            }
            Err(e) if find_cuo_error(&e).is_some_and(CuoError::is_scale_timeout) => {
                warn!(version, error = %e, "Extra capacity did not become ready in time");
                self.metrics.inc_scaling(version, false);
                self.notify(
                    uc,
                    NotifyState::Skipped,
                    format!("Capacity reservation skipped: {e}"),
                )
                .await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_control_plane_maint_window(&self, uc: &UpgradeConfig) -> Result<bool> {
        let ends_at = Utc::now() + self.config.control_plane_duration();
        self.maintenance
            .start_control_plane(
                ends_at,
                uc.desired_version(),
                &self.config.maintenance.ignored_alerts.control_plane_criticals,
            )
            .await?;
        Ok(true)
    }

    async fn commence_upgrade(&self, uc: &UpgradeConfig) -> Result<bool> {
        let version = uc.desired_version();
        self.metrics.set_upgrade_window_breached(version, false);
        if self.commenced(uc, step::COMMENCE_UPGRADE).await? {
            return Ok(true);
        }

        if !ensure_desired_config(self.store.as_ref(), uc).await? {
            info!(version, "ClusterVersion not yet updated to the desired release");
            return Ok(false);
        }
        self.notify(
            uc,
            NotifyState::ControlPlaneStarted,
            format!("Control plane is being upgraded to version {version}"),
        )
        .await?;
        Ok(true)
    }

    async fn control_plane_upgraded(&self, uc: &UpgradeConfig) -> Result<bool> {
        let version = uc.desired_version();
        let cv = self.store.get_cluster_version().await?;

        if has_upgrade_completed(&cv, uc) {
            self.notify(
                uc,
                NotifyState::ControlPlaneFinished,
                format!("Control plane has been upgraded to version {version}"),
            )
            .await?;
            self.metrics.set_control_plane_timeout(version, false);
            return Ok(true);
        }

        let started = match update_started_at(&cv, version) {
            Some(t) => t,
            None => uc.spec.upgrade_at_time()?,
        };
        if started + self.config.control_plane_duration() < Utc::now() {
            warn!(version, started = %started, "Control plane upgrade timeout");
            self.metrics.set_control_plane_timeout(version, true);
        }
        Ok(false)
    }

    async fn remove_control_plane_maint_window(&self) -> Result<bool> {
        self.maintenance.end_control_plane().await?;
        Ok(true)
    }

    /// Silence worker disruption long enough to drain every pending worker.
    async fn create_worker_maint_window(&self, uc: &UpgradeConfig) -> Result<bool> {
        let version = uc.desired_version();
        let pool = self.store.get_machine_config_pool(WORKER_POOL).await?;
        let progress = is_upgrading(&pool);
        if !progress.upgrading {
            info!(version, "Worker nodes are already upgraded, skipping worker maintenance");
            return Ok(true);
        }
        let pending = progress.total - progress.updated;
        if pending < 1 {
            info!(version, "No worker node left for upgrading");
            return Ok(true);
        }

        let drain = &self.config.node_drain;
        let wait = uc.spec.pdb_drain_timeout().max(drain.timeout_duration()) * pending;
        let action = drain.expected_drain_duration() * pending;
        let ends_at = Utc::now() + wait + action;
        info!(version, pending, ends_at = %ends_at, "Setting worker maintenance window");
        self.maintenance.set_worker(ends_at, version, pending).await?;
        Ok(true)
    }

    async fn all_workers_upgraded(&self, uc: &UpgradeConfig) -> Result<bool> {
        let version = uc.desired_version();
        let pool = self.store.get_machine_config_pool(WORKER_POOL).await?;
        let progress = is_upgrading(&pool);
        let silenced = self.maintenance.is_active().await?;

        if progress.upgrading {
            info!(
                version,
                updated = progress.updated,
                total = progress.total,
                "Not all workers are upgraded"
            );
            if silenced {
                self.metrics.set_worker_timeout(version, false);
            } else {
                warn!(version, "Worker upgrade timeout");
                self.metrics.set_worker_timeout(version, true);
            }
            return Ok(false);
        }

        self.notify(
            uc,
            NotifyState::WorkersFinished,
            format!("All worker nodes have been upgraded to version {version}"),
        )
        .await?;
        self.metrics.set_worker_timeout(version, false);
        Ok(true)
    }

    async fn remove_extra_scaled_nodes(&self, uc: &UpgradeConfig) -> Result<bool> {
        if !uc.spec.capacity_reservation {
            info!("Capacity reservation disabled, no extra nodes to remove");
            return Ok(true);
        }
        if !can_scale(self.store.as_ref()).await? {
            return Ok(true);
        }

        let drain = NodeDrain::new(
            self.store.clone(),
            &self.config.node_drain,
            uc.spec.pdb_drain_timeout(),
            DrainProfile::ScaleDown,
        )?;
        match ensure_scale_down_nodes(self.store.as_ref(), Some(&drain), Utc::now()).await {
            Ok(done) => {
                if done {
                    self.metrics.clear_node_drain_failed();
                }
                Ok(done)
            }
            Err(e) => {
                if let Some(node) = find_cuo_error(&e).and_then(CuoError::drain_timeout_node) {
                    self.metrics.set_node_drain_failed(node, true);
                    error!(node, "Extra upgrade node failed to drain in time");
                } else {
                    error!(error = %e, "Failed to remove extra upgrade nodes");
                }
                Err(e)
            }
        }
    }

    async fn remove_maint_window(&self) -> Result<bool> {
        self.maintenance.end_worker().await?;
        Ok(true)
    }

    async fn post_upgrade_health_check(&self, uc: &UpgradeConfig) -> Result<bool> {
        self.basic_health_check(uc.desired_version(), "post").await?;
        Ok(true)
    }

    /// FedRAMP clusters rebuild their file integrity baseline after an upgrade.
    async fn post_upgrade_procedures(&self) -> Result<bool> {
        if !self.config.environment.fedramp {
            info!("Non-FedRAMP environment, skipping file integrity re-initialization");
            return Ok(true);
        }
        self.store.reinit_file_integrity().await?;
        info!("File integrity database re-initialization requested");
        Ok(true)
    }

    async fn send_completed_notification(&self, uc: &UpgradeConfig) -> Result<bool> {
        let description = format!(
            "Cluster has been successfully upgraded to version {}",
            uc.desired_version()
        );
        self.notify(uc, NotifyState::Completed, description).await?;
        Ok(true)
    }
}
