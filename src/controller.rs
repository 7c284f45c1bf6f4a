//! UpgradeConfig controller - phase transitions, upgrader dispatch and error policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{error, info, warn};

use crate::clusterversion::current_version;
use crate::crd::{UpgradeConfig, UpgradePhase};
use crate::error::find_cuo_error;
use crate::metrics::Metrics;
use crate::status::{self, EventRecorder, StatusEvent};
use crate::store::ClusterStore;
use crate::upgrader::ClusterUpgrader;

const IMMEDIATE: Duration = Duration::from_millis(100);
const IN_PROGRESS: Duration = Duration::from_secs(60);
const TRANSIENT_RETRY: Duration = Duration::from_secs(10);

/// Shared context for the controller.
pub struct Context {
    pub kube_client: kube::Client,
    pub store: Arc<dyn ClusterStore>,
    pub upgrader: Arc<ClusterUpgrader>,
    pub metrics: Arc<Metrics>,
}

/// When the controller should look at the resource again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Requeue(Duration),
    AwaitChange,
}

impl From<Next> for Action {
    fn from(next: Next) -> Self {
        match next {
            Next::Requeue(d) => Action::requeue(d),
            Next::AwaitChange => Action::await_change(),
        }
    }
}

/// Result of one pass over an UpgradeConfig.
#[derive(Debug)]
pub struct Outcome {
    pub phase: UpgradePhase,
    pub next: Next,
    pub events: Vec<StatusEvent>,
}

impl Outcome {
    fn new(phase: UpgradePhase, next: Next) -> Self {
        Self {
            phase,
            next,
            events: Vec::new(),
        }
    }

    fn with_event(mut self, event: StatusEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Reconcile an UpgradeConfig resource.
pub async fn reconcile(obj: Arc<UpgradeConfig>, ctx: Arc<Context>) -> Result<Action, kube::Error> {
    let name = obj.name_any();
    let started = Instant::now();
    let recorder = EventRecorder::new(ctx.kube_client.clone(), &obj);
    let mut uc = (*obj).clone();

    info!(
        upgradeconfig = %name,
        version = uc.desired_version(),
        phase = %status::desired_phase(&uc),
        "Reconciling"
    );

    let (next, result) = match drive(
        &mut uc,
        ctx.store.as_ref(),
        &ctx.upgrader,
        &ctx.metrics,
        Utc::now(),
    )
    .await
    {
        Ok(outcome) => {
            for event in &outcome.events {
                recorder.publish(event).await;
            }
            (outcome.next, "success")
        }
        Err(e) => {
            let (next, event) = error_outcome(&e);
            match &event {
                Some(event) => {
                    error!(upgradeconfig = %name, error = %e, "Reconcile failed");
                    recorder.publish(event).await;
                }
                None => warn!(upgradeconfig = %name, error = %e, "Transient error, will retry"),
            }
            (next, "error")
        }
    };

    ctx.metrics
        .observe_reconcile(&name, result, started.elapsed().as_secs_f64());
    Ok(next.into())
}

/// Error policy for the controller.
pub fn error_policy(obj: Arc<UpgradeConfig>, err: &kube::Error, _ctx: Arc<Context>) -> Action {
    error!(upgradeconfig = %obj.name_any(), error = %err, "Controller error");
    Action::requeue(Duration::from_secs(30))
}

/// Transient errors retry quickly and quietly; anything else is surfaced as a
/// warning event and retried at the normal pace.
pub fn error_outcome(err: &anyhow::Error) -> (Next, Option<StatusEvent>) {
    if find_cuo_error(err).is_some_and(|e| e.is_transient()) {
        return (Next::Requeue(TRANSIENT_RETRY), None);
    }
    (
        Next::Requeue(IN_PROGRESS),
        Some(StatusEvent::warning("ReconcileError", format!("{err:#}"))),
    )
}

/// Move the desired version's history entry one phase forward.
pub async fn drive(
    uc: &mut UpgradeConfig,
    store: &dyn ClusterStore,
    upgrader: &ClusterUpgrader,
    metrics: &Metrics,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    let version = uc.desired_version().to_string();
    if version.is_empty() {
        return Ok(Outcome::new(UpgradePhase::New, Next::AwaitChange));
    }
    let name = uc.name_any();

    match status::desired_phase(uc) {
        UpgradePhase::New => {
            uc.status
                .get_or_insert_with(Default::default)
                .ensure_history(&version)
                .phase = UpgradePhase::Pending;
            store.patch_upgrade_config_status(uc).await?;
            metrics.set_phase(&version, UpgradePhase::Pending);
            info!(upgradeconfig = %name, version = %version, "Upgrade pending");
            Ok(
                Outcome::new(UpgradePhase::Pending, Next::Requeue(IMMEDIATE)).with_event(
                    StatusEvent::normal(
                        "UpgradePending",
                        format!("Upgrade to {version} scheduled at {}", uc.spec.upgrade_at),
                    ),
                ),
            )
        }
        UpgradePhase::Pending => start_if_due(uc, store, metrics, now).await,
        UpgradePhase::Upgrading => {
            metrics.ensure_upgrade_start(&name, &version);
            let phase = upgrader.upgrade(uc).await?;
            metrics.set_phase(&version, phase);
            Ok(match phase {
                UpgradePhase::Upgraded => {
                    if let Some(seconds) = metrics.observe_upgrade_duration(&name, &version) {
                        info!(
                            upgradeconfig = %name,
                            version = %version,
                            seconds,
                            "Upgrade duration recorded"
                        );
                    }
                    Outcome::new(phase, Next::AwaitChange).with_event(StatusEvent::normal(
                        "UpgradeCompleted",
                        format!("Cluster upgraded to {version}"),
                    ))
                }
                UpgradePhase::Failed => Outcome::new(phase, Next::AwaitChange).with_event(
                    StatusEvent::warning("UpgradeFailed", format!("Upgrade to {version} failed")),
                ),
                _ => Outcome::new(phase, Next::Requeue(IN_PROGRESS)),
            })
        }
        phase @ (UpgradePhase::Upgraded | UpgradePhase::Failed) => {
            Ok(Outcome::new(phase, Next::AwaitChange))
        }
    }
}

/// Pending → Upgrading once `upgradeAt` has passed and no other version is
/// still being upgraded.
async fn start_if_due(
    uc: &mut UpgradeConfig,
    store: &dyn ClusterStore,
    metrics: &Metrics,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    let version = uc.desired_version().to_string();
    let name = uc.name_any();
    let upgrade_at = uc.spec.upgrade_at_time()?;

    if upgrade_at > now {
        let remaining = (upgrade_at - now).to_std().unwrap_or(IN_PROGRESS);
        return Ok(Outcome::new(
            UpgradePhase::Pending,
            Next::Requeue(remaining.min(IN_PROGRESS)),
        ));
    }

    if let Some(other) = status::other_upgrade_in_progress(uc) {
        info!(
            upgradeconfig = %name,
            version = %version,
            upgrading = other,
            "Another upgrade is in progress, waiting"
        );
        return Ok(Outcome::new(UpgradePhase::Pending, Next::Requeue(IN_PROGRESS)));
    }

    let cv = store.get_cluster_version().await?;
    let preceding = current_version(&cv).map(str::to_string);
    let history = uc
        .status
        .get_or_insert_with(Default::default)
        .ensure_history(&version);
    history.phase = UpgradePhase::Upgrading;
    history.start_time = Some(now);
    history.preceding_version = preceding.clone();
    store.patch_upgrade_config_status(uc).await?;

    metrics.ensure_upgrade_start(&name, &version);
    metrics.set_phase(&version, UpgradePhase::Upgrading);
    info!(
        upgradeconfig = %name,
        version = %version,
        from = preceding.as_deref().unwrap_or("unknown"),
        "Upgrade started"
    );

    Ok(
        Outcome::new(UpgradePhase::Upgrading, Next::Requeue(IMMEDIATE)).with_event(
            StatusEvent::normal(
                "UpgradeStarted",
                format!(
                    "Starting upgrade from {} to {version}",
                    preceding.as_deref().unwrap_or("unknown")
                ),
            ),
        ),
    )
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::crd::openshift::UpdateHistory;
    use crate::crd::UpgradeHistory;
    use crate::error::CuoError;
    use crate::testing::{cluster_version, ts, upgrade_config};
    use crate::upgrader::testing::Harness;

    fn with_phase(version: &str, phase: UpgradePhase) -> UpgradeConfig {
        let mut uc = upgrade_config(version);
        let mut history = UpgradeHistory::new(version);
        history.phase = phase;
        uc.status
            .get_or_insert_with(Default::default)
            .set_history(history);
        uc
    }

    async fn run(h: &Harness, uc: &mut UpgradeConfig, now: DateTime<Utc>) -> Outcome {
        drive(uc, h.store.as_ref(), &h.upgrader, &h.metrics, now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_moves_to_pending() {
        let h = Harness::new();
        let mut uc = upgrade_config("4.15.3");

        let outcome = run(&h, &mut uc, ts(0)).await;
        assert_eq!(outcome.phase, UpgradePhase::Pending);
        assert_eq!(outcome.next, Next::Requeue(IMMEDIATE));
        assert_eq!(outcome.events[0].reason, "UpgradePending");
        assert_eq!(status::desired_phase(&uc), UpgradePhase::Pending);
        assert_eq!(h.store.status_patches(), 1);
    }

    #[tokio::test]
    async fn test_empty_version_is_idle() {
        let h = Harness::new();
        let mut uc = upgrade_config("");

        let outcome = run(&h, &mut uc, ts(0)).await;
        assert_eq!(outcome.next, Next::AwaitChange);
        assert!(uc.status.is_none());
        assert_eq!(h.store.status_patches(), 0);
    }

    #[tokio::test]
    async fn test_pending_waits_for_upgrade_at() {
        let h = Harness::new();
        let mut uc = with_phase("4.15.3", UpgradePhase::Pending);

        let outcome = run(&h, &mut uc, ts(-30)).await;
        assert_eq!(outcome.phase, UpgradePhase::Pending);
        assert_eq!(outcome.next, Next::Requeue(IN_PROGRESS));

        let outcome = run(&h, &mut uc, ts(0) - ChronoDuration::seconds(5)).await;
        assert_eq!(outcome.next, Next::Requeue(Duration::from_secs(5)));
        assert_eq!(h.store.status_patches(), 0);
    }

    #[tokio::test]
    async fn test_pending_waits_for_other_upgrade() {
        let h = Harness::new();
        let mut uc = with_phase("4.15.3", UpgradePhase::Pending);
        let mut previous = UpgradeHistory::new("4.15.2");
        previous.phase = UpgradePhase::Upgrading;
        uc.status
            .get_or_insert_with(Default::default)
            .history
            .push(previous);

        let outcome = run(&h, &mut uc, ts(10)).await;
        assert_eq!(outcome.phase, UpgradePhase::Pending);
        assert_eq!(outcome.next, Next::Requeue(IN_PROGRESS));
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn test_pending_starts_upgrade_when_due() {
        let h = Harness::new();
        let mut cv = cluster_version("stable-4.15", None, &["4.15.3"]);
        cv.status.get_or_insert_with(Default::default).history = vec![UpdateHistory {
            state: "Completed".into(),
            version: "4.15.2".into(),
            completion_time: Some(ts(-600)),
            ..Default::default()
        }];
        h.store.set_cluster_version(cv);
        let mut uc = with_phase("4.15.3", UpgradePhase::Pending);

        let outcome = run(&h, &mut uc, ts(1)).await;
        assert_eq!(outcome.phase, UpgradePhase::Upgrading);
        assert_eq!(outcome.events[0].reason, "UpgradeStarted");
        assert!(outcome.events[0].message.contains("from 4.15.2 to 4.15.3"));

        let history = status::desired_history(&uc).unwrap();
        assert_eq!(history.phase, UpgradePhase::Upgrading);
        assert_eq!(history.start_time, Some(ts(1)));
        assert_eq!(history.preceding_version.as_deref(), Some("4.15.2"));
        assert_eq!(h.store.status_patches(), 1);
    }

    #[tokio::test]
    async fn test_upgrading_in_progress_requeues() {
        let h = Harness::new();
        h.store
            .set_cluster_version(cluster_version("stable-4.15", None, &["4.15.3"]));
        h.store.set_machine_config_pool("worker", 3, 0);
        let mut uc = with_phase("4.15.3", UpgradePhase::Upgrading);
        uc.status
            .as_mut()
            .and_then(|s| s.history_mut("4.15.3"))
            .unwrap()
            .start_time = Some(Utc::now());

        let outcome = run(&h, &mut uc, Utc::now()).await;
        assert_eq!(outcome.phase, UpgradePhase::Upgrading);
        assert_eq!(outcome.next, Next::Requeue(IN_PROGRESS));
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn test_upgrading_failure_emits_warning() {
        let h = Harness::new();
        h.store
            .set_cluster_version(cluster_version("stable-4.14", None, &[]));
        let mut uc = with_phase("4.15.3", UpgradePhase::Upgrading);
        uc.status
            .as_mut()
            .and_then(|s| s.history_mut("4.15.3"))
            .unwrap()
            .start_time = Some(Utc::now() - ChronoDuration::minutes(180));

        let outcome = run(&h, &mut uc, Utc::now()).await;
        assert_eq!(outcome.phase, UpgradePhase::Failed);
        assert_eq!(outcome.next, Next::AwaitChange);
        assert!(outcome.events[0].warning);
        assert_eq!(outcome.events[0].reason, "UpgradeFailed");
    }

    #[tokio::test]
    async fn test_terminal_phases_await_change() {
        let h = Harness::new();
        for phase in [UpgradePhase::Upgraded, UpgradePhase::Failed] {
            let mut uc = with_phase("4.15.3", phase);
            let outcome = run(&h, &mut uc, ts(0)).await;
            assert_eq!(outcome.phase, phase);
            assert_eq!(outcome.next, Next::AwaitChange);
        }
        assert_eq!(h.store.status_patches(), 0);
    }

    #[test]
    fn test_error_outcome_classification() {
        let transient = anyhow::Error::from(CuoError::KubernetesApi("timeout".into()))
            .context("patch status");
        assert_eq!(error_outcome(&transient), (Next::Requeue(TRANSIENT_RETRY), None));

        let permanent = anyhow::Error::from(CuoError::InvalidConfig("upgradeAt".into()));
        let (next, event) = error_outcome(&permanent);
        assert_eq!(next, Next::Requeue(IN_PROGRESS));
        let event = event.unwrap();
        assert!(event.warning);
        assert!(event.message.contains("upgradeAt"));
    }
}
