//! Best-effort pod operations shared by the drain strategies.

use k8s_openapi::api::core::v1::Pod;
use tracing::{info, warn};

use crate::error::PodErrors;
use crate::store::ClusterStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub message: String,
    pub marked_for_deletion: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveFinalizersResult {
    pub message: String,
    pub removed: usize,
}

fn pod_ref(pod: &Pod) -> (&str, &str) {
    (
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}

/// Delete every pod in `pods`, continuing past individual failures.
///
/// With `ignore_already_deleting`, pods that already carry a deletion timestamp
/// are left alone.
pub async fn delete_pods(
    store: &dyn ClusterStore,
    pods: &[Pod],
    ignore_already_deleting: bool,
    grace_period_seconds: Option<u32>,
) -> Result<DeleteResult, PodErrors> {
    let mut errors = PodErrors::new();
    let mut marked = Vec::new();

    for pod in pods {
        let (ns, name) = pod_ref(pod);
        if ignore_already_deleting && pod.metadata.deletion_timestamp.is_some() {
            info!(pod = name, namespace = ns, "Pod is already being deleted, skipping");
            continue;
        }
        info!(pod = name, namespace = ns, "Deleting pod");
        match store.delete_pod(pod, grace_period_seconds).await {
            Ok(()) => marked.push(name.to_string()),
            Err(e) => {
                warn!(pod = name, namespace = ns, error = %e, "Failed to delete pod");
                errors.push(format!("{ns}/{name}: {e}"));
            }
        }
    }

    errors.into_result()?;
    Ok(DeleteResult {
        message: format!("Pod(s) {} have been marked for deletion", marked.join(",")),
        marked_for_deletion: marked.len(),
    })
}

/// Clear finalizers on every pod that has any, continuing past individual failures.
pub async fn remove_finalizers(
    store: &dyn ClusterStore,
    pods: &[Pod],
) -> Result<RemoveFinalizersResult, PodErrors> {
    let mut errors = PodErrors::new();
    let mut removed = Vec::new();

    for pod in pods {
        if pod.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            continue;
        }
        let (ns, name) = pod_ref(pod);
        info!(pod = name, namespace = ns, "Removing pod finalizers");
        match store.remove_pod_finalizers(pod).await {
            Ok(()) => removed.push(name.to_string()),
            Err(e) => {
                warn!(pod = name, namespace = ns, error = %e, "Failed to remove finalizers");
                errors.push(format!("{ns}/{name}: {e}"));
            }
        }
    }

    errors.into_result()?;
    Ok(RemoveFinalizersResult {
        message: format!("Finalizers removed for pods: {}", removed.join(",")),
        removed: removed.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeStore, PodBuilder};

    #[tokio::test]
    async fn test_delete_pods_best_effort() {
        let store = FakeStore::new();
        store.fail_pod_delete("b");
        let pods = vec![
            PodBuilder::new("a", "shop").build(),
            PodBuilder::new("b", "shop").build(),
            PodBuilder::new("c", "shop").build(),
        ];

        let err = delete_pods(&store, &pods, false, Some(0)).await.unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.to_string().starts_with("1 error(s) occurred: shop/b"));
        assert_eq!(
            store.deleted_pods(),
            vec![("a".to_string(), Some(0)), ("c".to_string(), Some(0))]
        );
    }

    #[tokio::test]
    async fn test_delete_pods_skips_terminating() {
        let store = FakeStore::new();
        let pods = vec![
            PodBuilder::new("a", "shop").build(),
            PodBuilder::new("b", "shop").terminating().build(),
        ];
        let res = delete_pods(&store, &pods, true, None).await.unwrap();
        assert_eq!(res.marked_for_deletion, 1);
        assert_eq!(res.message, "Pod(s) a have been marked for deletion");
    }

    #[tokio::test]
    async fn test_remove_finalizers_only_touches_pods_with_finalizers() {
        let store = FakeStore::new();
        let pods = vec![
            PodBuilder::new("a", "shop").finalizer("x/y").build(),
            PodBuilder::new("b", "shop").build(),
        ];
        let res = remove_finalizers(&store, &pods).await.unwrap();
        assert_eq!(res.removed, 1);
        assert_eq!(res.message, "Finalizers removed for pods: a");
        assert_eq!(store.finalizers_removed(), vec!["a".to_string()]);
    }
}
