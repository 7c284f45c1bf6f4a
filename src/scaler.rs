//! Scaling engine: temporary worker capacity for the duration of an upgrade.
//!
//! Scale-up clones every original worker MachineSet into a one-replica
//! `<name>-upgrade` sibling. Scale-down deletes those siblings and drains the
//! nodes they brought in before the machines go away.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use kube::api::ObjectMeta;
use tracing::{info, warn};

use crate::crd::{Machine, MachineSet};
use crate::drain::NodeDrainStrategy;
use crate::error::CuoError;
use crate::machinery::{WORKER_POOL, is_master, is_node_ready, node_name, to_utc};
use crate::store::{ClusterStore, MACHINE_API_NAMESPACE};

pub const LABEL_UPGRADE: &str = "upgrade.managed.openshift.io";
pub const LABEL_MACHINESET: &str = "machine.openshift.io/cluster-api-machineset";
pub const LABEL_MACHINE_POOL: &str = "hive.openshift.io/machine-pool";
const UPGRADE_SUFFIX: &str = "-upgrade";

fn has_label(labels: Option<&BTreeMap<String, String>>, key: &str, value: &str) -> bool {
    labels.and_then(|l| l.get(key)).is_some_and(|v| v == value)
}

pub fn is_upgrade_machine_set(ms: &MachineSet) -> bool {
    has_label(ms.metadata.labels.as_ref(), LABEL_UPGRADE, "true")
}

pub fn is_original_worker_machine_set(ms: &MachineSet) -> bool {
    has_label(ms.metadata.labels.as_ref(), LABEL_MACHINE_POOL, WORKER_POOL)
        && !is_upgrade_machine_set(ms)
}

pub fn is_upgrade_machine(machine: &Machine) -> bool {
    has_label(machine.metadata.labels.as_ref(), LABEL_UPGRADE, "true")
}

fn ms_name(ms: &MachineSet) -> &str {
    ms.metadata.name.as_deref().unwrap_or_default()
}

fn upgrade_name(original: &str) -> String {
    format!("{original}{UPGRADE_SUFFIX}")
}

/// Clone of `original` with one replica and the upgrade labels.
pub fn upgrade_machine_set(original: &MachineSet) -> MachineSet {
    let name = upgrade_name(ms_name(original));
    let mut ms = original.clone();
    ms.metadata = ObjectMeta {
        name: Some(name.clone()),
        namespace: original
            .metadata
            .namespace
            .clone()
            .or_else(|| Some(MACHINE_API_NAMESPACE.to_string())),
        labels: Some(BTreeMap::from([(LABEL_UPGRADE.to_string(), "true".to_string())])),
        ..ObjectMeta::default()
    };
    ms.spec.replicas = Some(1);
    for labels in [
        &mut ms.spec.template.metadata.labels,
        &mut ms.spec.selector.match_labels,
    ] {
        labels.insert(LABEL_UPGRADE.to_string(), "true".to_string());
        labels.insert(LABEL_MACHINESET.to_string(), name.clone());
    }
    ms.status = None;
    ms
}

/// Whether the cluster has worker MachineSets to clone.
pub async fn can_scale(store: &dyn ClusterStore) -> Result<bool> {
    let sets = store.list_machine_sets().await?;
    Ok(sets.iter().any(is_original_worker_machine_set))
}

/// Create the extra capacity and report once every extra node is Ready.
///
/// A round that creates any MachineSet returns false so readiness is looked
/// at on the next tick.
pub async fn ensure_scale_up_nodes(
    store: &dyn ClusterStore,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sets = store.list_machine_sets().await?;
    let (upgrade, original): (Vec<&MachineSet>, Vec<&MachineSet>) = sets
        .iter()
        .filter(|ms| is_upgrade_machine_set(ms) || is_original_worker_machine_set(ms))
        .partition(|ms| is_upgrade_machine_set(ms));

    if original.is_empty() {
        return Err(anyhow!("failed to get original machineset"));
    }

    let mut created = false;
    for ms in &original {
        let wanted = upgrade_name(ms_name(ms));
        if upgrade.iter().any(|u| ms_name(u) == wanted) {
            continue;
        }
        info!(machineset = %wanted, "Creating machineset for upgrade");
        store.create_machine_set(&upgrade_machine_set(ms)).await?;
        created = true;
    }
    if created {
        info!("Created upgrade machinesets, will re-check their state on reconcile");
        return Ok(false);
    }

    let machines = store.list_machines().await?;
    for ms in &upgrade {
        if !machine_set_ready(store, ms, &machines, timeout, now).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn machine_set_ready(
    store: &dyn ClusterStore,
    ms: &MachineSet,
    machines: &[Machine],
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<bool> {
    let name = ms_name(ms);
    let timed_out = ms
        .metadata
        .creation_timestamp
        .as_ref()
        .and_then(to_utc)
        .is_some_and(|created| created + timeout < now);

    let status = ms.status.clone().unwrap_or_default();
    if status.replicas != status.ready_replicas {
        if timed_out {
            return Err(CuoError::ScaleTimeout(format!(
                "Machineset {name} provisioning timeout"
            ))
            .into());
        }
        info!(machineset = name, "Not all machines are ready yet");
        return Ok(false);
    }

    let owned: Vec<&Machine> = machines
        .iter()
        .filter(|m| {
            is_upgrade_machine(m) && has_label(m.metadata.labels.as_ref(), LABEL_MACHINESET, name)
        })
        .collect();
    let [machine] = owned.as_slice() else {
        warn!(machineset = name, machines = owned.len(), "Expected exactly one upgrade machine");
        return Ok(false);
    };

    let ready = match machine.node_name() {
        Some(node) => is_node_ready(&store.get_node(node).await?),
        None => false,
    };
    if !ready {
        let node = machine.node_name().unwrap_or_default();
        if timed_out {
            return Err(CuoError::ScaleTimeout(format!(
                "Timeout waiting for node:{node} to become ready"
            ))
            .into());
        }
        info!(machineset = name, node, "Upgrade node is not ready yet");
        return Ok(false);
    }
    Ok(true)
}

/// Remove the extra capacity, draining its nodes first when `drain` is given.
///
/// The first node whose drain has failed aborts the round with
/// [`CuoError::DrainTimeout`].
pub async fn ensure_scale_down_nodes(
    store: &dyn ClusterStore,
    drain: Option<&dyn NodeDrainStrategy>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sets = store.list_machine_sets().await?;
    for ms in sets.iter().filter(|ms| is_upgrade_machine_set(ms)) {
        if ms.metadata.deletion_timestamp.is_none() {
            info!(machineset = ms_name(ms), "Deleting upgrade machineset");
            store.delete_machine_set(ms_name(ms)).await?;
        }
    }

    let nodes = store.list_nodes().await?;
    if let Some(drain) = drain {
        let extra = extra_upgrade_nodes(store, &nodes).await?;
        for node in &extra {
            for result in drain.execute(node, now).await? {
                info!(node = node_name(node), "{}", result.message);
            }
        }
        for node in &extra {
            if drain.has_failed(node, now).await? {
                return Err(CuoError::DrainTimeout {
                    node: node_name(node).to_string(),
                }
                .into());
            }
        }
    }

    let expected: i32 = store
        .list_machine_sets()
        .await?
        .iter()
        .filter(|ms| !is_upgrade_machine_set(ms))
        .map(MachineSet::replicas)
        .sum();
    let workers = nodes.iter().filter(|n| !is_master(n)).count();
    let done = usize::try_from(expected).is_ok_and(|e| e == workers);
    if !done {
        info!(workers, expected, "Waiting for extra upgrade nodes to be removed");
    }
    Ok(done)
}

async fn extra_upgrade_nodes(
    store: &dyn ClusterStore,
    nodes: &[k8s_openapi::api::core::v1::Node],
) -> Result<Vec<k8s_openapi::api::core::v1::Node>> {
    let machines = store.list_machines().await?;
    let mut extra = Vec::new();
    for machine in machines.iter().filter(|m| is_upgrade_machine(m)) {
        if !matches!(machine.phase(), Some("Running" | "Deleting")) {
            continue;
        }
        let Some(node) = machine.node_name() else {
            return Err(anyhow!(
                "an upgrade machine {} exists but has no node association",
                machine.metadata.name.as_deref().unwrap_or_default()
            ));
        };
        extra.extend(nodes.iter().filter(|n| node_name(n) == node).cloned());
    }
    Ok(extra)
}
