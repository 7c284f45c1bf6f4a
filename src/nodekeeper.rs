//! Node keeper - drains cordoned workers while the machine-config operator
//! rolls the worker pool, and flags nodes whose drain ran out of time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::NodeDrainConfig;
use crate::crd::{UpgradeConfig, UpgradePhase};
use crate::drain::{DrainProfile, NodeDrain, NodeDrainStrategy};
use crate::machinery::{WORKER_POOL, is_master, is_node_cordoned, is_upgrading, node_name};
use crate::metrics::Metrics;
use crate::status;
use crate::store::ClusterStore;

/// What happened to one cordoned node during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub node: String,
    pub executed: Vec<String>,
    pub failed: bool,
}

pub struct NodeKeeper {
    store: Arc<dyn ClusterStore>,
    metrics: Arc<Metrics>,
    drain: NodeDrainConfig,
    interval: Duration,
}

impl NodeKeeper {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        metrics: Arc<Metrics>,
        drain: NodeDrainConfig,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            drain,
            interval,
        }
    }

    /// Run passes forever. A failed pass is logged and retried on the next tick.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_seconds = self.interval.as_secs(), "Starting node keeper");
        loop {
            ticker.tick().await;
            if let Err(e) = self.reconcile(Utc::now()).await {
                warn!(error = %e, "Node keeper pass failed");
            }
        }
    }

    /// One pass over every node. Outside a worker upgrade nothing is drained and
    /// all node drain flags are cleared.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<Vec<NodeReport>> {
        let Some(uc) = self.active_worker_upgrade().await? else {
            debug!("No worker upgrade in progress");
            self.metrics.clear_node_drain_failed();
            return Ok(Vec::new());
        };

        let drain = NodeDrain::new(
            self.store.clone(),
            &self.drain,
            uc.spec.pdb_drain_timeout(),
            DrainProfile::WorkerUpgrade,
        )?;

        let mut reports = Vec::new();
        for node in self.store.list_nodes().await? {
            if is_master(&node) {
                continue;
            }
            let name = node_name(&node).to_string();
            if !is_node_cordoned(&node).cordoned {
                self.metrics.set_node_drain_failed(&name, false);
                continue;
            }

            let executed = match drain.execute(&node, now).await {
                Ok(results) => results.into_iter().map(|r| r.message).collect(),
                Err(e) => {
                    warn!(node = %name, error = %e, "Drain strategies failed");
                    Vec::new()
                }
            };
            for message in &executed {
                info!(node = %name, "{message}");
            }

            let failed = match drain.has_failed(&node, now).await {
                Ok(failed) => failed,
                Err(e) => {
                    warn!(node = %name, error = %e, "Could not evaluate drain timeout");
                    continue;
                }
            };
            if failed {
                warn!(node = %name, version = uc.desired_version(), "Node drain timed out");
            }
            self.metrics.set_node_drain_failed(&name, failed);
            reports.push(NodeReport {
                node: name,
                executed,
                failed,
            });
        }
        Ok(reports)
    }

    /// The UpgradeConfig being upgraded, while its worker pool is still rolling.
    async fn active_worker_upgrade(&self) -> Result<Option<UpgradeConfig>> {
        let Some(uc) = self
            .store
            .list_upgrade_configs()
            .await?
            .into_iter()
            .find(|uc| status::desired_phase(uc) == UpgradePhase::Upgrading)
        else {
            return Ok(None);
        };
        let pool = self.store.get_machine_config_pool(WORKER_POOL).await?;
        Ok(is_upgrading(&pool).upgrading.then_some(uc))
    }
}
