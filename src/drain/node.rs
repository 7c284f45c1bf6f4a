//! Node-level drain: builds the timed strategies for a node and applies them.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use regex::Regex;
use tracing::debug;

use super::predicates::{
    PodPredicate, filter_pods, is_allowed_namespace, is_not_daemonset, is_not_pdb_pod,
    is_pdb_pod,
};
use super::strategies::{EnsurePodDeletion, PodDeletion, RemoveFinalizers, StuckTerminating};
use super::timed::{TimedDrainComposer, TimedDrainStrategy};
use super::DrainStrategyResult;
use crate::config::NodeDrainConfig;
use crate::machinery::{is_node_cordoned, node_name};
use crate::store::ClusterStore;

/// Drain a node and report whether its drain has run out of time.
#[async_trait]
pub trait NodeDrainStrategy: Send + Sync {
    /// Apply every due strategy. An uncordoned node is left alone.
    async fn execute(&self, node: &Node, now: DateTime<Utc>) -> Result<Vec<DrainStrategyResult>>;

    /// False until the node has been cordoned with a recorded time.
    async fn has_failed(&self, node: &Node, now: DateTime<Utc>) -> Result<bool>;
}

/// Which set of timed strategies to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainProfile {
    /// Removing the extra capacity added for the upgrade.
    ScaleDown,
    /// Workers being rolled by the machine-config operator.
    WorkerUpgrade,
}

/// [`NodeDrainStrategy`] whose timed strategies are rebuilt from live cluster
/// state on every call.
pub struct NodeDrain {
    store: Arc<dyn ClusterStore>,
    profile: DrainProfile,
    timeout: Duration,
    expected_drain: Duration,
    pdb_timeout: Duration,
    ignored_namespaces: Arc<[Regex]>,
}

impl NodeDrain {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        config: &NodeDrainConfig,
        pdb_timeout: Duration,
        profile: DrainProfile,
    ) -> Result<Self> {
        Ok(Self {
            store,
            profile,
            timeout: config.timeout_duration(),
            expected_drain: config.expected_drain_duration(),
            pdb_timeout,
            ignored_namespaces: config.ignored_namespace_regexes()?.into(),
        })
    }

    /// Timed strategies for `node`. PDB strategies only appear when PDB-protected
    /// pods are on the node.
    pub async fn composer(&self, node: &Node) -> Result<TimedDrainComposer> {
        let pdbs: Arc<[PodDisruptionBudget]> = self.store.list_pdbs().await?.into();
        let pods = self.store.list_pods_on_node(node_name(node)).await?;

        let allowed_ns = is_allowed_namespace(self.ignored_namespaces.clone());
        let default_filters: Vec<PodPredicate> = vec![
            is_not_daemonset(),
            is_not_pdb_pod(pdbs.clone()),
            allowed_ns.clone(),
        ];
        let pdb_filters: Vec<PodPredicate> =
            vec![is_not_daemonset(), is_pdb_pod(pdbs), allowed_ns];
        let has_pdb_pods = !filter_pods(pods, &pdb_filters).is_empty();

        let store = &self.store;
        let mut strategies = Vec::new();
        match self.profile {
            DrainProfile::ScaleDown => {
                strategies.push(TimedDrainStrategy::new(
                    "DEFAULT",
                    "Default pod deletion",
                    self.timeout,
                    EnsurePodDeletion::new(store.clone(), default_filters),
                ));
                if has_pdb_pods {
                    strategies.push(TimedDrainStrategy::new(
                        "PDB",
                        "PDB pod deletion",
                        self.pdb_timeout,
                        EnsurePodDeletion::new(store.clone(), pdb_filters),
                    ));
                }
            }
            DrainProfile::WorkerUpgrade => {
                strategies.push(TimedDrainStrategy::new(
                    "DELETE",
                    "Default pod deletion",
                    self.timeout,
                    PodDeletion::new(store.clone(), default_filters.clone()),
                ));
                strategies.push(TimedDrainStrategy::new(
                    "DEFAULT-FINALIZER",
                    "Default pod finalizer removal",
                    self.timeout,
                    RemoveFinalizers::new(store.clone(), default_filters.clone()),
                ));
                strategies.push(TimedDrainStrategy::new(
                    "POD-STUCK-TERMINATING",
                    "Pod stuck terminating removal",
                    self.timeout,
                    StuckTerminating::new(store.clone(), default_filters),
                ));
                if has_pdb_pods {
                    let pdb_wait = self.pdb_timeout + self.expected_drain;
                    strategies.push(TimedDrainStrategy::new(
                        "PDB-DELETE",
                        "PDB pod deletion",
                        pdb_wait,
                        PodDeletion::new(store.clone(), pdb_filters.clone()),
                    ));
                    strategies.push(TimedDrainStrategy::new(
                        "PDB-FINALIZER",
                        "PDB pod finalizer removal",
                        pdb_wait,
                        RemoveFinalizers::new(store.clone(), pdb_filters),
                    ));
                }
            }
        }

        debug!(
            node = node_name(node),
            profile = ?self.profile,
            strategies = strategies.len(),
            "Built drain strategies"
        );
        Ok(TimedDrainComposer::new(
            strategies,
            self.timeout,
            self.expected_drain,
        ))
    }
}

#[async_trait]
impl NodeDrainStrategy for NodeDrain {
    async fn execute(&self, node: &Node, now: DateTime<Utc>) -> Result<Vec<DrainStrategyResult>> {
        let cordon = is_node_cordoned(node);
        if !cordon.cordoned {
            return Ok(Vec::new());
        }
        let Some(cordoned_at) = cordon.added_at else {
            return Err(anyhow!(
                "cannot determine drain commencement time for node {}",
                node_name(node)
            ));
        };
        self.composer(node)
            .await?
            .execute(node, cordoned_at, now)
            .await
    }

    async fn has_failed(&self, node: &Node, now: DateTime<Utc>) -> Result<bool> {
        let Some(cordoned_at) = is_node_cordoned(node).added_at else {
            return Ok(false);
        };
        self.composer(node)
            .await?
            .has_failed(node, cordoned_at, now)
            .await
    }
}
