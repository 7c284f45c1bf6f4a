//! Node and machine config pool state helpers.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::crd::MachineConfigPool;

/// Annotation the machine-config daemon keeps up to date on every node.
pub const MCD_STATE_ANNOTATION: &str = "machineconfiguration.openshift.io/state";
pub const MCD_STATE_WORKING: &str = "Working";

/// Machine config pool rolled out to worker nodes.
pub const WORKER_POOL: &str = "worker";

/// Label carried by control plane nodes.
pub const MASTER_NODE_LABEL: &str = "node-role.kubernetes.io/master";

/// Cordon state of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CordonStatus {
    pub cordoned: bool,
    /// When the `NoSchedule` taint was applied, if the API recorded it.
    pub added_at: Option<DateTime<Utc>>,
}

/// Rollout progress of a machine config pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradingResult {
    pub upgrading: bool,
    pub updated: i32,
    pub total: i32,
}

/// Convert an API timestamp. `Time` serializes as RFC3339.
pub fn to_utc(time: &Time) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// A node is cordoned when it is unschedulable and carries a `NoSchedule` taint.
pub fn is_node_cordoned(node: &Node) -> CordonStatus {
    let Some(spec) = node.spec.as_ref() else {
        return CordonStatus::default();
    };
    if !spec.unschedulable.unwrap_or(false) {
        return CordonStatus::default();
    }

    let mut status = CordonStatus::default();
    for taint in spec.taints.iter().flatten() {
        if taint.effect == "NoSchedule" {
            status.cordoned = true;
            status.added_at = taint.time_added.as_ref().and_then(to_utc);
        }
    }
    status
}

pub fn is_upgrading(pool: &MachineConfigPool) -> UpgradingResult {
    let (total, updated) = pool
        .status
        .as_ref()
        .map_or((0, 0), |s| (s.machine_count, s.updated_machine_count));
    UpgradingResult {
        upgrading: total != updated,
        updated,
        total,
    }
}

/// The machine-config daemon is actively applying a config to this node.
pub fn is_node_upgrading(node: &Node) -> bool {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(MCD_STATE_ANNOTATION))
        .is_some_and(|state| state == MCD_STATE_WORKING)
}

pub fn is_master(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(MASTER_NODE_LABEL))
}

pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}
