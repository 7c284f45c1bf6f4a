//! `ClusterStore` backed by the Kubernetes API.

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::Api;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use tracing::debug;

use super::{ClusterStore, MACHINE_API_NAMESPACE};
use crate::crd::{
    ClusterOperator, ClusterVersion, Machine, MachineConfigPool, MachineSet, Release,
    UpgradeConfig,
};
use crate::error::CuoError;

const FIELD_MANAGER: &str = "cuo";
const CLUSTER_VERSION_NAME: &str = "version";
const FILE_INTEGRITY_NAMESPACE: &str = "openshift-file-integrity";
const FILE_INTEGRITY_NAME: &str = "osd-fileintegrity";
const FILE_INTEGRITY_REINIT_ANNOTATION: &str = "file-integrity.openshift.io/re-init";

fn file_integrity_api_resource() -> ApiResource {
    ApiResource {
        group: "fileintegrity.openshift.io".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "fileintegrity.openshift.io/v1alpha1".to_string(),
        kind: "FileIntegrity".to_string(),
        plural: "fileintegrities".to_string(),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Cluster access through a shared `kube::Client`.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
    /// Namespace watched for `UpgradeConfig` resources.
    namespace: String,
}

impl KubeStore {
    pub fn new(client: kube::Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods_in(&self, pod: &Pod) -> Api<Pod> {
        match pod.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn machine_sets(&self) -> Api<MachineSet> {
        Api::namespaced(self.client.clone(), MACHINE_API_NAMESPACE)
    }

    fn cluster_versions(&self) -> Api<ClusterVersion> {
        Api::all(self.client.clone())
    }
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let lp = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let list = api
            .list(&lp)
            .await
            .map_err(|e| CuoError::kube(&format!("Failed to list pods on node {node}"), &e))?;
        Ok(list.items)
    }

    async fn delete_pod(&self, pod: &Pod, grace_period_seconds: Option<u32>) -> Result<()> {
        let name = pod_name(pod);
        let dp = DeleteParams {
            grace_period_seconds,
            ..DeleteParams::default()
        };
        match self.pods_in(pod).delete(name, &dp).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(pod = name, "Pod already gone");
                Ok(())
            }
            Err(e) => Err(CuoError::kube(&format!("Failed to delete pod {name}"), &e).into()),
        }
    }

    async fn remove_pod_finalizers(&self, pod: &Pod) -> Result<()> {
        let name = pod_name(pod);
        let patch = serde_json::json!({ "metadata": { "finalizers": null } });
        self.pods_in(pod)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                CuoError::kube(&format!("Failed to remove finalizers from pod {name}"), &e)
            })?;
        Ok(())
    }

    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>> {
        let api: Api<PodDisruptionBudget> = Api::all(self.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(CuoError::kube("Failed to list PDBs", &e).into()),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CuoError::kube("Failed to list nodes", &e))?;
        Ok(list.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api
            .get(name)
            .await
            .map_err(|e| CuoError::kube(&format!("Failed to get node {name}"), &e))?;
        Ok(node)
    }

    async fn list_machine_sets(&self) -> Result<Vec<MachineSet>> {
        let list = self
            .machine_sets()
            .list(&ListParams::default())
            .await
            .map_err(|e| CuoError::kube("Failed to list machinesets", &e))?;
        Ok(list.items)
    }

    async fn create_machine_set(&self, machine_set: &MachineSet) -> Result<()> {
        self.machine_sets()
            .create(&PostParams::default(), machine_set)
            .await
            .map_err(|e| CuoError::kube("Failed to create machineset", &e))?;
        Ok(())
    }

    async fn delete_machine_set(&self, name: &str) -> Result<()> {
        match self
            .machine_sets()
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => {
                Err(CuoError::kube(&format!("Failed to delete machineset {name}"), &e).into())
            }
        }
    }

    async fn list_machines(&self) -> Result<Vec<Machine>> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), MACHINE_API_NAMESPACE);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CuoError::kube("Failed to list machines", &e))?;
        Ok(list.items)
    }

    async fn get_machine_config_pool(&self, name: &str) -> Result<MachineConfigPool> {
        let api: Api<MachineConfigPool> = Api::all(self.client.clone());
        let pool = api.get(name).await.map_err(|e| {
            CuoError::kube(&format!("Failed to get machineconfigpool {name}"), &e)
        })?;
        Ok(pool)
    }

    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        let cv = self
            .cluster_versions()
            .get(CLUSTER_VERSION_NAME)
            .await
            .map_err(|e| CuoError::kube("Failed to get clusterversion", &e))?;
        Ok(cv)
    }

    async fn set_cluster_version_channel(&self, channel: &str) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "channel": channel } });
        self.cluster_versions()
            .patch(
                CLUSTER_VERSION_NAME,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| CuoError::kube("Failed to set clusterversion channel", &e))?;
        Ok(())
    }

    async fn set_cluster_version_desired_update(&self, release: &Release) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "desiredUpdate": release } });
        self.cluster_versions()
            .patch(
                CLUSTER_VERSION_NAME,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| CuoError::kube("Failed to set clusterversion desired update", &e))?;
        Ok(())
    }

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>> {
        let api: Api<ClusterOperator> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CuoError::kube("Failed to list clusteroperators", &e))?;
        Ok(list.items)
    }

    async fn list_upgrade_configs(&self) -> Result<Vec<UpgradeConfig>> {
        let api: Api<UpgradeConfig> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CuoError::kube("Failed to list upgradeconfigs", &e))?;
        Ok(list.items)
    }

    async fn patch_upgrade_config_status(&self, uc: &UpgradeConfig) -> Result<()> {
        let name = uc.metadata.name.as_deref().unwrap_or_default();
        let ns = uc.metadata.namespace.as_deref().unwrap_or(&self.namespace);
        let api: Api<UpgradeConfig> = Api::namespaced(self.client.clone(), ns);
        debug!(upgrade_config = name, "Patching status");

        let patch = serde_json::json!({ "status": uc.status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| CuoError::kube(&format!("Failed to patch status of {name}"), &e))?;
        Ok(())
    }

    async fn reinit_file_integrity(&self) -> Result<()> {
        let ar = file_integrity_api_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), FILE_INTEGRITY_NAMESPACE, &ar);
        let patch = serde_json::json!({
            "metadata": { "annotations": { FILE_INTEGRITY_REINIT_ANNOTATION: "" } }
        });
        api.patch(
            FILE_INTEGRITY_NAME,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| {
            CuoError::kube(
                &format!("Failed to annotate file integrity {FILE_INTEGRITY_NAME}"),
                &e,
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_integrity_api_resource() {
        let ar = file_integrity_api_resource();
        assert_eq!(ar.api_version, "fileintegrity.openshift.io/v1alpha1");
        assert_eq!(ar.plural, "fileintegrities");
    }
}
