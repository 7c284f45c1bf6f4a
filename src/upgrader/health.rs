//! Cluster health checks run around an upgrade.
//!
//! Every check returns `Ok(())` when healthy and a [`CuoError::HealthCheck`]
//! naming the offending objects otherwise.

use anyhow::Result;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use crate::clusterversion::degraded_operators;
use crate::config::HealthCheckConfig;
use crate::error::CuoError;
use crate::machinery::{is_master, is_node_cordoned, is_node_upgrading, node_name};
use crate::maintenance::{Alert, AlertSource};
use crate::store::ClusterStore;

/// Namespaces whose critical alerts block an upgrade: `openshift*`, `kube-*`
/// and `default`.
fn is_platform_namespace(ns: &str) -> bool {
    ns.starts_with("openshift") || ns.starts_with("kube-") || ns == "default"
}

/// Names of the alerts that should hold an upgrade back.
pub fn blocking_alerts(alerts: &[Alert], config: &HealthCheckConfig) -> Vec<String> {
    let mut names: Vec<String> = alerts
        .iter()
        .filter(|a| {
            a.namespace.as_deref().is_some_and(|ns| {
                is_platform_namespace(ns) && !config.ignored_namespaces.iter().any(|i| i == ns)
            })
        })
        .filter(|a| !config.ignored_criticals.contains(&a.name))
        .map(|a| a.name.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

pub async fn critical_alerts(alerts: &dyn AlertSource, config: &HealthCheckConfig) -> Result<()> {
    let firing = alerts.firing_critical_alerts().await?;
    let blocking = blocking_alerts(&firing, config);
    if blocking.is_empty() {
        debug!(firing = firing.len(), "No blocking critical alerts");
        return Ok(());
    }
    Err(CuoError::HealthCheck(format!("critical alert(s) firing: {}", blocking.join(", "))).into())
}

pub async fn cluster_operators(store: &dyn ClusterStore) -> Result<()> {
    let degraded = degraded_operators(store).await?;
    if degraded.is_empty() {
        return Ok(());
    }
    Err(CuoError::HealthCheck(format!(
        "degraded cluster operators: {}",
        degraded.join(", ")
    ))
    .into())
}

/// Worker nodes cordoned by hand rather than by the machine-config daemon.
pub async fn cordoned_nodes(store: &dyn ClusterStore) -> Result<()> {
    let nodes = store.list_nodes().await?;
    let cordoned: Vec<&str> = nodes
        .iter()
        .filter(|n| !is_master(n) && !is_node_upgrading(n) && is_node_cordoned(n).cordoned)
        .map(node_name)
        .collect();
    if cordoned.is_empty() {
        return Ok(());
    }
    Err(CuoError::HealthCheck(format!("cordoned nodes: {}", cordoned.join(", "))).into())
}

/// Summary of PDB analysis results.
#[derive(Debug, Clone, Default)]
pub struct PdbSummary {
    pub total_pdbs: usize,
    /// `namespace/name` of every PDB that would stall a drain.
    pub blocking: Vec<String>,
}

impl PdbSummary {
    pub fn has_blocking_pdbs(&self) -> bool {
        !self.blocking.is_empty()
    }
}

fn forbids_disruption(max_unavailable: Option<&IntOrString>) -> bool {
    match max_unavailable {
        Some(IntOrString::Int(n)) => *n == 0,
        Some(IntOrString::String(s)) => s == "0" || s == "0%",
        None => false,
    }
}

/// Check user PDBs for drain deadlock.
///
/// A PDB outside the `openshift-` namespaces blocks when it allows no
/// unavailable pods at all, or when fewer pods are healthy than it demands.
pub fn check_pdbs(pdbs: &[PodDisruptionBudget]) -> PdbSummary {
    let mut summary = PdbSummary {
        total_pdbs: pdbs.len(),
        ..PdbSummary::default()
    };

    for pdb in pdbs {
        let namespace = pdb.metadata.namespace.as_deref().unwrap_or("default");
        if namespace.starts_with("openshift-") {
            continue;
        }
        let zero_budget = forbids_disruption(
            pdb.spec.as_ref().and_then(|s| s.max_unavailable.as_ref()),
        );
        let unhealthy = pdb
            .status
            .as_ref()
            .is_some_and(|s| s.current_healthy < s.desired_healthy);
        if zero_budget || unhealthy {
            let name = pdb.metadata.name.as_deref().unwrap_or("unknown");
            debug!(namespace, name, zero_budget, unhealthy, "Blocking PDB found");
            summary.blocking.push(format!("{namespace}/{name}"));
        }
    }
    summary
}

pub async fn pdbs(store: &dyn ClusterStore) -> Result<()> {
    let summary = check_pdbs(&store.list_pdbs().await?);
    debug!(
        total = summary.total_pdbs,
        blocking = summary.blocking.len(),
        "PDB check complete"
    );
    if !summary.has_blocking_pdbs() {
        return Ok(());
    }
    Err(CuoError::HealthCheck(format!(
        "PodDisruptionBudgets would block node drain: {}",
        summary.blocking.join(", ")
    ))
    .into())
}
