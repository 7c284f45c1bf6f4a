//! Minimal typed views of the OpenShift resources the operator touches.
//!
//! Only fields read or written here are modelled. The machine template spec is
//! kept as raw JSON so cloning a MachineSet preserves provider settings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// machine.openshift.io/v1beta1
// ---------------------------------------------------------------------------

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced,
    status = "MachineSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub selector: MachineSelector,
    #[serde(default)]
    pub template: MachineTemplate,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct MachineTemplate {
    #[serde(default)]
    pub metadata: MachineTemplateMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct MachineTemplateMeta {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
}

impl MachineSet {
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(0)
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct NodeRef {
    pub name: String,
}

impl Machine {
    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.phase.as_deref())
    }

    pub fn node_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref())
            .map(|r| r.name.as_str())
    }
}

// ---------------------------------------------------------------------------
// machineconfiguration.openshift.io/v1
// ---------------------------------------------------------------------------

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "MachineConfigPool",
    status = "MachineConfigPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolSpec {
    #[serde(default)]
    pub paused: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolStatus {
    #[serde(default)]
    pub machine_count: i32,
    #[serde(default)]
    pub updated_machine_count: i32,
    #[serde(default)]
    pub ready_machine_count: i32,
}

// ---------------------------------------------------------------------------
// config.openshift.io/v1
// ---------------------------------------------------------------------------

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ClusterVersion",
    status = "ClusterVersionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionSpec {
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_update: Option<Release>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Release {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionStatus {
    #[serde(default)]
    pub desired: Release,
    /// Newest entry first.
    #[serde(default)]
    pub history: Vec<UpdateHistory>,
    #[serde(default)]
    pub available_updates: Vec<Release>,
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHistory {
    /// `Completed` or `Partial`.
    pub state: String,
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Condition shape shared by ClusterVersion and ClusterOperator.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ClusterOperator",
    status = "ClusterOperatorStatus"
)]
pub struct ClusterOperatorSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterOperatorStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

impl ClusterVersion {
    pub fn condition(&self, condition_type: &str) -> Option<&ClusterCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == condition_type))
    }
}

impl ClusterOperator {
    pub fn condition_is(&self, condition_type: &str, status: &str) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.r#type == condition_type && c.status == status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machineset_preserves_template_spec() {
        let json = serde_json::json!({
            "apiVersion": "machine.openshift.io/v1beta1",
            "kind": "MachineSet",
            "metadata": {"name": "worker-a", "namespace": "openshift-machine-api"},
            "spec": {
                "replicas": 2,
                "selector": {"matchLabels": {"machine.openshift.io/cluster-api-machineset": "worker-a"}},
                "template": {
                    "metadata": {"labels": {"machine.openshift.io/cluster-api-machineset": "worker-a"}},
                    "spec": {"providerSpec": {"value": {"instanceType": "m5.xlarge"}}}
                }
            },
            "status": {"replicas": 2, "readyReplicas": 1}
        });
        let ms: MachineSet = serde_json::from_value(json).unwrap();
        assert_eq!(ms.replicas(), 2);
        assert_eq!(ms.status.as_ref().unwrap().ready_replicas, 1);
        assert_eq!(
            ms.spec.template.spec["providerSpec"]["value"]["instanceType"],
            "m5.xlarge"
        );
    }

    #[test]
    fn test_machine_node_ref() {
        let json = serde_json::json!({
            "apiVersion": "machine.openshift.io/v1beta1",
            "kind": "Machine",
            "metadata": {"name": "worker-a-upgrade-x7", "namespace": "openshift-machine-api"},
            "spec": {},
            "status": {"phase": "Running", "nodeRef": {"kind": "Node", "name": "ip-10-0-1-5"}}
        });
        let m: Machine = serde_json::from_value(json).unwrap();
        assert_eq!(m.phase(), Some("Running"));
        assert_eq!(m.node_name(), Some("ip-10-0-1-5"));
    }

    #[test]
    fn test_cluster_operator_condition() {
        let json = serde_json::json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterOperator",
            "metadata": {"name": "dns"},
            "spec": {},
            "status": {"conditions": [
                {"type": "Available", "status": "True"},
                {"type": "Degraded", "status": "True", "reason": "DNSDegraded"}
            ]}
        });
        let co: ClusterOperator = serde_json::from_value(json).unwrap();
        assert!(co.condition_is("Degraded", "True"));
        assert!(!co.condition_is("Available", "False"));
    }
}
