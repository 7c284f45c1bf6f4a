//! In-memory fakes and object builders shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    Node, NodeCondition, NodeSpec, NodeStatus, Pod, PodSpec, Taint,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference, Time};
use kube::api::ObjectMeta;

use crate::crd::openshift::{
    ClusterCondition, ClusterOperatorSpec, ClusterOperatorStatus, ClusterVersionSpec,
    ClusterVersionStatus, MachineConfigPoolSpec, MachineConfigPoolStatus, MachineSetStatus,
    MachineSpec, MachineStatus, NodeRef,
};
use crate::crd::{
    ClusterOperator, ClusterVersion, Machine, MachineConfigPool, MachineSet, MachineSetSpec,
    Release, UpgradeConfig, UpgradeConfigSpec, UpgradeType, Update,
};
use crate::machinery::{MASTER_NODE_LABEL, MCD_STATE_ANNOTATION};
use crate::maintenance::{Alert, AlertSource, Maintenance};
use crate::notify::{Notifier, NotifyState, UpgradeEvent};
use crate::store::{ClusterStore, MACHINE_API_NAMESPACE};

/// `minutes` after a fixed instant in the past.
pub fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub fn k8s_time(t: DateTime<Utc>) -> Time {
    serde_json::from_value(serde_json::json!(
        t.to_rfc3339_opts(SecondsFormat::Secs, true)
    ))
    .unwrap()
}

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(ToString::to_string),
        ..ObjectMeta::default()
    }
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct NodeBuilder {
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    unschedulable: bool,
    /// `Some(added_at)` adds a `NoSchedule` taint.
    taint: Option<Option<DateTime<Utc>>>,
    ready: bool,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn cordoned_at(mut self, at: DateTime<Utc>) -> Self {
        self.unschedulable = true;
        self.taint = Some(Some(at));
        self
    }

    pub fn cordoned_untimed(mut self) -> Self {
        self.unschedulable = true;
        self.taint = Some(None);
        self
    }

    pub fn unschedulable(mut self) -> Self {
        self.unschedulable = true;
        self
    }

    pub fn master(mut self) -> Self {
        self.labels.insert(MASTER_NODE_LABEL.to_string(), String::new());
        self
    }

    pub fn mcd_state(mut self, state: &str) -> Self {
        self.annotations
            .insert(MCD_STATE_ANNOTATION.to_string(), state.to_string());
        self
    }

    pub fn ready(mut self) -> Self {
        self.ready = true;
        self
    }

    pub fn build(self) -> Node {
        let taints = self.taint.map(|added| {
            vec![Taint {
                key: "node.kubernetes.io/unschedulable".to_string(),
                effect: "NoSchedule".to_string(),
                time_added: added.map(k8s_time),
                value: None,
            }]
        });
        let status = self.ready.then(|| NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..NodeCondition::default()
            }]),
            ..NodeStatus::default()
        });
        Node {
            metadata: ObjectMeta {
                labels: Some(self.labels),
                annotations: Some(self.annotations),
                ..meta(&self.name, None)
            },
            spec: Some(NodeSpec {
                unschedulable: Some(self.unschedulable),
                taints,
                ..NodeSpec::default()
            }),
            status,
        }
    }
}

pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            pod: Pod {
                metadata: meta(name, Some(namespace)),
                spec: Some(PodSpec::default()),
                status: None,
            },
        }
    }

    pub fn on_node(mut self, node: &str) -> Self {
        if let Some(spec) = self.pod.spec.as_mut() {
            spec.node_name = Some(node.to_string());
        }
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn owned_by(mut self, kind: &str) -> Self {
        self.pod
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: kind.to_string(),
                name: "owner".to_string(),
                uid: "0000".to_string(),
                ..OwnerReference::default()
            });
        self
    }

    pub fn finalizer(mut self, finalizer: &str) -> Self {
        self.pod
            .metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        self
    }

    pub fn terminating(mut self) -> Self {
        self.pod.metadata.deletion_timestamp = Some(k8s_time(ts(0)));
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

pub fn pdb(name: &str, namespace: &str, match_labels: &[(&str, &str)]) -> PodDisruptionBudget {
    let match_labels = (!match_labels.is_empty()).then(|| labels(match_labels));
    PodDisruptionBudget {
        metadata: meta(name, Some(namespace)),
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(LabelSelector {
                match_labels,
                ..LabelSelector::default()
            }),
            ..PodDisruptionBudgetSpec::default()
        }),
        status: None,
    }
}

pub fn machine_set(name: &str, replicas: i32, created: DateTime<Utc>) -> MachineSet {
    let mut ms = MachineSet::new(
        name,
        MachineSetSpec {
            replicas: Some(replicas),
            ..MachineSetSpec::default()
        },
    );
    ms.metadata.namespace = Some(MACHINE_API_NAMESPACE.to_string());
    ms.metadata.creation_timestamp = Some(k8s_time(created));
    ms.status = Some(MachineSetStatus {
        replicas,
        ready_replicas: replicas,
        available_replicas: replicas,
    });
    ms
}

pub fn machine(name: &str, phase: &str, node: Option<&str>) -> Machine {
    let mut m = Machine::new(name, MachineSpec::default());
    m.metadata.namespace = Some(MACHINE_API_NAMESPACE.to_string());
    m.status = Some(MachineStatus {
        phase: Some(phase.to_string()),
        node_ref: node.map(|n| NodeRef {
            name: n.to_string(),
        }),
    });
    m
}

/// ClusterVersion on `channel`, optionally already targeting `desired`, with
/// `available` offered as updates.
pub fn cluster_version(channel: &str, desired: Option<&str>, available: &[&str]) -> ClusterVersion {
    let mut cv = ClusterVersion::new(
        "version",
        ClusterVersionSpec {
            cluster_id: "2c3b7a8e".to_string(),
            channel: Some(channel.to_string()),
            desired_update: desired.map(|v| Release {
                version: v.to_string(),
                ..Release::default()
            }),
        },
    );
    cv.status = Some(ClusterVersionStatus {
        available_updates: available
            .iter()
            .map(|v| Release {
                version: (*v).to_string(),
                image: format!("quay.io/openshift-release-dev/ocp-release:{v}-x86_64"),
                force: false,
            })
            .collect(),
        ..ClusterVersionStatus::default()
    });
    cv
}

pub fn cluster_operator(name: &str, conditions: &[(&str, &str)]) -> ClusterOperator {
    let mut co = ClusterOperator::new(name, ClusterOperatorSpec {});
    co.status = Some(ClusterOperatorStatus {
        conditions: conditions
            .iter()
            .map(|(t, s)| ClusterCondition {
                r#type: (*t).to_string(),
                status: (*s).to_string(),
                ..ClusterCondition::default()
            })
            .collect(),
    });
    co
}

pub fn upgrade_config(version: &str) -> UpgradeConfig {
    let mut uc = UpgradeConfig::new(
        "managed-upgrade-config",
        UpgradeConfigSpec {
            desired: Update {
                version: version.to_string(),
                channel: "stable-4.15".to_string(),
                image: None,
                force: false,
            },
            upgrade_at: ts(0).to_rfc3339(),
            pdb_force_drain_timeout: 60,
            upgrade_type: UpgradeType::Osd,
            capacity_reservation: false,
        },
    );
    uc.metadata.namespace = Some("openshift-managed-upgrade-operator".to_string());
    uc
}

// ---------------------------------------------------------------------------
// FakeStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    pods: Vec<Pod>,
    pdbs: Vec<PodDisruptionBudget>,
    nodes: Vec<Node>,
    machine_sets: Vec<MachineSet>,
    machines: Vec<Machine>,
    pools: BTreeMap<String, MachineConfigPool>,
    cluster_version: Option<ClusterVersion>,
    operators: Vec<ClusterOperator>,
    upgrade_configs: Vec<UpgradeConfig>,

    failing_pod_deletes: Vec<String>,
    stuck_pods: Vec<String>,
    failing_pod_lists: Vec<String>,

    deleted_pods: Vec<(String, Option<u32>)>,
    finalizers_removed: Vec<String>,
    created_machine_sets: Vec<String>,
    deleted_machine_sets: Vec<String>,
    status_patches: usize,
    file_integrity_reinits: usize,
}

fn name_of(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// [`ClusterStore`] over plain vectors. Writes are recorded for assertions.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_pod(&self, pod: Pod) {
        self.with(|s| s.pods.push(pod));
    }

    /// Make deleting the named pod fail.
    pub fn fail_pod_delete(&self, name: &str) {
        self.with(|s| s.failing_pod_deletes.push(name.to_string()));
    }

    /// Deleting the named pod succeeds but the pod never goes away.
    pub fn stick_pod(&self, name: &str) {
        self.with(|s| s.stuck_pods.push(name.to_string()));
    }

    /// Make listing the pods on the named node fail.
    pub fn fail_pod_list(&self, node: &str) {
        self.with(|s| s.failing_pod_lists.push(node.to_string()));
    }

    pub fn add_pdb(&self, pdb: PodDisruptionBudget) {
        self.with(|s| s.pdbs.push(pdb));
    }

    /// Insert or replace a node by name.
    pub fn add_node(&self, node: Node) {
        self.with(|s| {
            s.nodes.retain(|n| name_of(&n.metadata) != name_of(&node.metadata));
            s.nodes.push(node);
        });
    }

    pub fn remove_node(&self, name: &str) {
        self.with(|s| s.nodes.retain(|n| name_of(&n.metadata) != name));
    }

    pub fn add_machine_set(&self, ms: MachineSet) {
        self.with(|s| s.machine_sets.push(ms));
    }

    pub fn add_machine(&self, machine: Machine) {
        self.with(|s| s.machines.push(machine));
    }

    pub fn remove_machine(&self, name: &str) {
        self.with(|s| s.machines.retain(|m| name_of(&m.metadata) != name));
    }

    pub fn set_machine_config_pool(&self, name: &str, total: i32, updated: i32) {
        let mut pool = MachineConfigPool::new(name, MachineConfigPoolSpec::default());
        pool.status = Some(MachineConfigPoolStatus {
            machine_count: total,
            updated_machine_count: updated,
            ready_machine_count: updated,
        });
        self.with(|s| s.pools.insert(name.to_string(), pool));
    }

    pub fn set_cluster_version(&self, cv: ClusterVersion) {
        self.with(|s| s.cluster_version = Some(cv));
    }

    pub fn add_cluster_operator(&self, co: ClusterOperator) {
        self.with(|s| s.operators.push(co));
    }

    pub fn add_upgrade_config(&self, uc: UpgradeConfig) {
        self.with(|s| s.upgrade_configs.push(uc));
    }

    pub fn deleted_pods(&self) -> Vec<(String, Option<u32>)> {
        self.with(|s| s.deleted_pods.clone())
    }

    pub fn finalizers_removed(&self) -> Vec<String> {
        self.with(|s| s.finalizers_removed.clone())
    }

    pub fn created_machine_sets(&self) -> Vec<String> {
        self.with(|s| s.created_machine_sets.clone())
    }

    pub fn deleted_machine_sets(&self) -> Vec<String> {
        self.with(|s| s.deleted_machine_sets.clone())
    }

    pub fn status_patches(&self) -> usize {
        self.with(|s| s.status_patches)
    }

    pub fn file_integrity_reinits(&self) -> usize {
        self.with(|s| s.file_integrity_reinits)
    }

    /// Last status written for the named UpgradeConfig.
    pub fn upgrade_config(&self, name: &str) -> Option<UpgradeConfig> {
        self.with(|s| {
            s.upgrade_configs
                .iter()
                .find(|uc| name_of(&uc.metadata) == name)
                .cloned()
        })
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>> {
        if self.with(|s| s.failing_pod_lists.iter().any(|n| n == node)) {
            return Err(anyhow!("injected failure listing pods on {node}"));
        }
        Ok(self.with(|s| {
            s.pods
                .iter()
                .filter(|p| {
                    p.spec
                        .as_ref()
                        .and_then(|spec| spec.node_name.as_deref())
                        == Some(node)
                })
                .cloned()
                .collect()
        }))
    }

    async fn delete_pod(&self, pod: &Pod, grace_period_seconds: Option<u32>) -> Result<()> {
        let name = name_of(&pod.metadata).to_string();
        self.with(|s| {
            if s.failing_pod_deletes.contains(&name) {
                return Err(anyhow!("injected failure deleting pod {name}"));
            }
            s.deleted_pods.push((name.clone(), grace_period_seconds));
            if !s.stuck_pods.contains(&name) {
                s.pods.retain(|p| name_of(&p.metadata) != name);
            }
            Ok(())
        })
    }

    async fn remove_pod_finalizers(&self, pod: &Pod) -> Result<()> {
        let name = name_of(&pod.metadata).to_string();
        self.with(|s| {
            for p in s.pods.iter_mut().filter(|p| name_of(&p.metadata) == name) {
                p.metadata.finalizers = None;
            }
            s.finalizers_removed.push(name);
        });
        Ok(())
    }

    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>> {
        Ok(self.with(|s| s.pdbs.clone()))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.with(|s| s.nodes.clone()))
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.with(|s| {
            s.nodes
                .iter()
                .find(|n| name_of(&n.metadata) == name)
                .cloned()
                .ok_or_else(|| anyhow!("node {name} not found"))
        })
    }

    async fn list_machine_sets(&self) -> Result<Vec<MachineSet>> {
        Ok(self.with(|s| s.machine_sets.clone()))
    }

    async fn create_machine_set(&self, machine_set: &MachineSet) -> Result<()> {
        self.with(|s| {
            s.created_machine_sets
                .push(name_of(&machine_set.metadata).to_string());
            s.machine_sets.push(machine_set.clone());
        });
        Ok(())
    }

    async fn delete_machine_set(&self, name: &str) -> Result<()> {
        self.with(|s| {
            s.machine_sets.retain(|ms| name_of(&ms.metadata) != name);
            s.deleted_machine_sets.push(name.to_string());
        });
        Ok(())
    }

    async fn list_machines(&self) -> Result<Vec<Machine>> {
        Ok(self.with(|s| s.machines.clone()))
    }

    async fn get_machine_config_pool(&self, name: &str) -> Result<MachineConfigPool> {
        self.with(|s| {
            s.pools
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("machineconfigpool {name} not found"))
        })
    }

    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        self.with(|s| {
            s.cluster_version
                .clone()
                .ok_or_else(|| anyhow!("clusterversion not found"))
        })
    }

    async fn set_cluster_version_channel(&self, channel: &str) -> Result<()> {
        self.with(|s| {
            let cv = s
                .cluster_version
                .as_mut()
                .ok_or_else(|| anyhow!("clusterversion not found"))?;
            cv.spec.channel = Some(channel.to_string());
            Ok(())
        })
    }

    async fn set_cluster_version_desired_update(&self, release: &Release) -> Result<()> {
        self.with(|s| {
            let cv = s
                .cluster_version
                .as_mut()
                .ok_or_else(|| anyhow!("clusterversion not found"))?;
            cv.spec.desired_update = Some(release.clone());
            Ok(())
        })
    }

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>> {
        Ok(self.with(|s| s.operators.clone()))
    }

    async fn list_upgrade_configs(&self) -> Result<Vec<UpgradeConfig>> {
        Ok(self.with(|s| s.upgrade_configs.clone()))
    }

    async fn patch_upgrade_config_status(&self, uc: &UpgradeConfig) -> Result<()> {
        self.with(|s| {
            s.status_patches += 1;
            if let Some(stored) = s
                .upgrade_configs
                .iter_mut()
                .find(|u| u.metadata.name == uc.metadata.name)
            {
                stored.status.clone_from(&uc.status);
            }
        });
        Ok(())
    }

    async fn reinit_file_integrity(&self) -> Result<()> {
        self.with(|s| s.file_integrity_reinits += 1);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collaborator fakes
// ---------------------------------------------------------------------------

/// Notifier that keeps every event, optionally failing instead.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<UpgradeEvent>>,
    failure: Mutex<Option<String>>,
}

impl RecordingNotifier {
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn events(&self) -> Vec<UpgradeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<NotifyState> {
        self.events().iter().map(|e| e.state).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &UpgradeEvent) -> Result<()> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MaintenanceState {
    control_plane_starts: usize,
    worker_windows: Vec<(DateTime<Utc>, String, i32)>,
    control_plane_ends: usize,
    worker_ends: usize,
    active: bool,
}

/// Maintenance that records every call. `is_active` returns what the test set.
#[derive(Default)]
pub struct FakeMaintenance {
    state: Mutex<MaintenanceState>,
}

impl FakeMaintenance {
    pub fn set_active(&self, active: bool) {
        self.state.lock().unwrap().active = active;
    }

    pub fn control_plane_starts(&self) -> usize {
        self.state.lock().unwrap().control_plane_starts
    }

    pub fn worker_windows(&self) -> Vec<(DateTime<Utc>, String, i32)> {
        self.state.lock().unwrap().worker_windows.clone()
    }

    pub fn ends(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.control_plane_ends, state.worker_ends)
    }
}

#[async_trait]
impl Maintenance for FakeMaintenance {
    async fn start_control_plane(
        &self,
        _ends_at: DateTime<Utc>,
        _version: &str,
        _ignored_alerts: &[String],
    ) -> Result<()> {
        self.state.lock().unwrap().control_plane_starts += 1;
        Ok(())
    }

    async fn set_worker(&self, ends_at: DateTime<Utc>, version: &str, pending: i32) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .worker_windows
            .push((ends_at, version.to_string(), pending));
        Ok(())
    }

    async fn end_control_plane(&self) -> Result<()> {
        self.state.lock().unwrap().control_plane_ends += 1;
        Ok(())
    }

    async fn end_worker(&self) -> Result<()> {
        self.state.lock().unwrap().worker_ends += 1;
        Ok(())
    }

    async fn is_active(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().active)
    }
}

/// Alert source with a fixed set of firing alerts.
pub struct FakeAlerts {
    alerts: Vec<Alert>,
}

impl FakeAlerts {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self { alerts }
    }
}

#[async_trait]
impl AlertSource for FakeAlerts {
    async fn firing_critical_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.alerts.clone())
    }
}
