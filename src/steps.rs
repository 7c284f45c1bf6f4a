//! Ordered, resumable step runner.
//!
//! Progress lives entirely in the UpgradeConfig status: every step is a
//! condition on the history entry of the desired version. A step marked True
//! is never run again, so a runner re-entered after a crash or on the next
//! reconcile picks up at the first step that has not completed.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::crd::{ConditionStatus, UpgradeCondition, UpgradeConfig, UpgradeHistory, UpgradePhase};
use crate::metrics::{Metrics, StepOutcome};
use crate::store::ClusterStore;

type StepFn<C> =
    dyn for<'a> Fn(&'a C, &'a UpgradeConfig) -> BoxFuture<'a, Result<bool>> + Send + Sync;

/// A named unit of upgrade work. The action returns `Ok(true)` once done,
/// `Ok(false)` while it has to be retried later.
pub struct Step<C> {
    pub name: &'static str,
    action: Box<StepFn<C>>,
}

impl<C> Step<C> {
    pub fn new<F>(name: &'static str, action: F) -> Self
    where
        F: for<'a> Fn(&'a C, &'a UpgradeConfig) -> BoxFuture<'a, Result<bool>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            action: Box::new(action),
        }
    }

    async fn call(&self, ctx: &C, uc: &UpgradeConfig) -> Result<bool> {
        (self.action)(ctx, uc).await
    }
}

impl<C> std::fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// Names of `steps`, in order.
pub fn step_names<C>(steps: &[Step<C>]) -> Vec<&'static str> {
    steps.iter().map(|s| s.name).collect()
}

fn history(uc: &mut UpgradeConfig) -> &UpgradeHistory {
    let version = uc.desired_version().to_string();
    uc.status
        .get_or_insert_with(Default::default)
        .ensure_history(&version)
}

pub struct StepRunner {
    store: Arc<dyn ClusterStore>,
    metrics: Arc<Metrics>,
}

impl StepRunner {
    pub fn new(store: Arc<dyn ClusterStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Run `steps` in order against the history entry of the desired version.
    ///
    /// Stops at the first step that is not done (returning `Upgrading`) or that
    /// errors (returning the error). When every step is done the entry moves to
    /// `Upgraded`.
    pub async fn run<C: Sync>(
        &self,
        ctx: &C,
        uc: &mut UpgradeConfig,
        steps: &[Step<C>],
    ) -> Result<UpgradePhase> {
        let version = uc.desired_version().to_string();

        for step in steps {
            let condition = history(uc).condition(step.name).cloned();
            if condition.as_ref().is_some_and(UpgradeCondition::is_true) {
                debug!(step = step.name, version = %version, "Step already completed, skipping");
                continue;
            }

            if condition.is_none() {
                let mut started = UpgradeCondition::new(
                    step.name,
                    ConditionStatus::False,
                    format!("{} not done", step.name),
                    format!("{} has started", step.name),
                );
                started.start_time = Some(Utc::now());
                self.set_condition(uc, started).await?;
            }

            info!(step = step.name, version = %version, "Running upgrade step");
            let result = step.call(ctx, uc).await;
            let mut condition = history(uc)
                .condition(step.name)
                .cloned()
                .unwrap_or_else(|| {
                    UpgradeCondition::new(step.name, ConditionStatus::False, "", "")
                });

            match result {
                Err(e) => {
                    warn!(step = step.name, version = %version, error = %e, "Upgrade step failed");
                    self.metrics.record_step(step.name, StepOutcome::Error);
                    condition.status = ConditionStatus::False;
                    condition.reason = format!("{} not done", step.name);
                    condition.message = e.to_string();
                    condition.complete_time = None;
                    self.set_condition(uc, condition).await?;
                    return Err(e);
                }
                Ok(false) => {
                    info!(step = step.name, version = %version, "Upgrade step still in progress");
                    self.metrics.record_step(step.name, StepOutcome::InProgress);
                    condition.status = ConditionStatus::False;
                    condition.reason = format!("{} not done", step.name);
                    condition.message = format!("{} still in progress", step.name);
                    condition.complete_time = None;
                    self.set_condition(uc, condition).await?;
                    return Ok(UpgradePhase::Upgrading);
                }
                Ok(true) => {
                    info!(step = step.name, version = %version, "Upgrade step completed");
                    self.metrics.record_step(step.name, StepOutcome::Done);
                    condition.status = ConditionStatus::True;
                    condition.reason = format!("{} done", step.name);
                    condition.message = format!("{} is completed", step.name);
                    condition.complete_time = Some(Utc::now());
                    self.set_condition(uc, condition).await?;
                }
            }
        }

        let history = uc
            .status
            .get_or_insert_with(Default::default)
            .ensure_history(&version);
        history.phase = UpgradePhase::Upgraded;
        history.complete_time = Some(Utc::now());
        self.store.patch_upgrade_config_status(uc).await?;
        info!(version = %version, "All upgrade steps completed");
        Ok(UpgradePhase::Upgraded)
    }

    /// Record `condition` on the desired version's history entry and persist.
    async fn set_condition(
        &self,
        uc: &mut UpgradeConfig,
        condition: UpgradeCondition,
    ) -> Result<()> {
        let version = uc.desired_version().to_string();
        uc.status
            .get_or_insert_with(Default::default)
            .ensure_history(&version)
            .set_condition(condition, Utc::now());
        self.store.patch_upgrade_config_status(uc).await
    }
}
