//! Object store adapter over the cluster API.
//!
//! Every read and write the upgrade logic performs goes through [`ClusterStore`],
//! so reconcilers run against [`KubeStore`] and unit tests against an in-memory fake.

pub mod client;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

use crate::crd::{
    ClusterOperator, ClusterVersion, Machine, MachineConfigPool, MachineSet, Release,
    UpgradeConfig,
};

pub use client::KubeStore;

/// Namespace holding MachineSets and Machines.
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

/// Typed access to the cluster objects read and mutated during an upgrade.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Pods scheduled onto `node`, across all namespaces.
    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>>;

    /// Delete a pod. `None` keeps the pod's own grace period, `Some(0)` forces.
    async fn delete_pod(&self, pod: &Pod, grace_period_seconds: Option<u32>) -> Result<()>;

    /// Clear `metadata.finalizers` on a pod.
    async fn remove_pod_finalizers(&self, pod: &Pod) -> Result<()>;

    /// All PodDisruptionBudgets. A missing PDB API yields an empty list.
    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn get_node(&self, name: &str) -> Result<Node>;

    async fn list_machine_sets(&self) -> Result<Vec<MachineSet>>;

    async fn create_machine_set(&self, machine_set: &MachineSet) -> Result<()>;

    async fn delete_machine_set(&self, name: &str) -> Result<()>;

    async fn list_machines(&self) -> Result<Vec<Machine>>;

    async fn get_machine_config_pool(&self, name: &str) -> Result<MachineConfigPool>;

    async fn get_cluster_version(&self) -> Result<ClusterVersion>;

    async fn set_cluster_version_channel(&self, channel: &str) -> Result<()>;

    async fn set_cluster_version_desired_update(&self, release: &Release) -> Result<()>;

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>>;

    async fn list_upgrade_configs(&self) -> Result<Vec<UpgradeConfig>>;

    /// Persist `uc.status` onto the status subresource.
    async fn patch_upgrade_config_status(&self, uc: &UpgradeConfig) -> Result<()>;

    /// Ask the file integrity operator to rebuild its baseline database.
    async fn reinit_file_integrity(&self) -> Result<()>;
}
