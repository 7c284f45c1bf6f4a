//! Pod predicates used to select drain targets.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use regex::Regex;

/// Pure, pod-local test.
pub type PodPredicate = Arc<dyn Fn(&Pod) -> bool + Send + Sync>;

/// Keep the pods for which every predicate holds. No predicates keeps everything.
pub fn filter_pods(pods: Vec<Pod>, predicates: &[PodPredicate]) -> Vec<Pod> {
    pods.into_iter()
        .filter(|pod| predicates.iter().all(|p| p(pod)))
        .collect()
}

pub fn is_on_node(node: impl Into<String>) -> PodPredicate {
    let node = node.into();
    Arc::new(move |pod| {
        pod.spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .is_some_and(|n| n == node)
    })
}

fn owned_by_daemonset(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|o| o.kind == "DaemonSet")
}

pub fn is_daemonset() -> PodPredicate {
    Arc::new(owned_by_daemonset)
}

pub fn is_not_daemonset() -> PodPredicate {
    Arc::new(|pod| !owned_by_daemonset(pod))
}

/// Any single `matchLabels` pair of any PDB found on the pod counts as a match.
fn matches_any_pdb(pod: &Pod, pdbs: &[PodDisruptionBudget]) -> bool {
    let Some(labels) = pod.metadata.labels.as_ref() else {
        return false;
    };
    pdbs.iter()
        .filter_map(|pdb| pdb.spec.as_ref()?.selector.as_ref()?.match_labels.as_ref())
        .flatten()
        .any(|(k, v)| labels.get(k) == Some(v))
}

pub fn is_pdb_pod(pdbs: Arc<[PodDisruptionBudget]>) -> PodPredicate {
    Arc::new(move |pod| matches_any_pdb(pod, &pdbs))
}

pub fn is_not_pdb_pod(pdbs: Arc<[PodDisruptionBudget]>) -> PodPredicate {
    Arc::new(move |pod| !matches_any_pdb(pod, &pdbs))
}

fn finalizer_count(pod: &Pod) -> usize {
    pod.metadata.finalizers.as_ref().map_or(0, Vec::len)
}

pub fn has_finalizers() -> PodPredicate {
    Arc::new(|pod| finalizer_count(pod) > 0)
}

pub fn has_no_finalizers() -> PodPredicate {
    Arc::new(|pod| finalizer_count(pod) == 0)
}

pub fn is_terminating() -> PodPredicate {
    Arc::new(|pod| pod.metadata.deletion_timestamp.is_some())
}

/// True when the pod's namespace matches none of the ignore patterns.
pub fn is_allowed_namespace(ignored: Arc<[Regex]>) -> PodPredicate {
    Arc::new(move |pod| {
        let ns = pod.metadata.namespace.as_deref().unwrap_or_default();
        !ignored.iter().any(|re| re.is_match(ns))
    })
}
