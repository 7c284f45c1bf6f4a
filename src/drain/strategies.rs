//! Action strategies: the concrete things a drain can do to the pods on a node.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};

use super::pods::{delete_pods, remove_finalizers};
use super::predicates::{
    PodPredicate, filter_pods, has_finalizers, has_no_finalizers, is_on_node, is_terminating,
};
use super::{DrainStrategy, DrainStrategyResult};
use crate::error::CuoError;
use crate::machinery::node_name;
use crate::store::ClusterStore;

/// Pods on `node` matching `base` and then `filters`.
async fn target_pods(
    store: &dyn ClusterStore,
    node: &Node,
    base: Vec<PodPredicate>,
    filters: &[PodPredicate],
) -> Result<Vec<Pod>> {
    let name = node_name(node);
    let pods = store.list_pods_on_node(name).await?;
    let mut predicates = vec![is_on_node(name)];
    predicates.extend(base);
    predicates.extend(filters.iter().cloned());
    Ok(filter_pods(pods, &predicates))
}

/// Strip finalizers from the matching pods, then delete all of them.
pub struct EnsurePodDeletion {
    store: Arc<dyn ClusterStore>,
    filters: Vec<PodPredicate>,
}

impl EnsurePodDeletion {
    pub fn new(store: Arc<dyn ClusterStore>, filters: Vec<PodPredicate>) -> Self {
        Self { store, filters }
    }
}

#[async_trait]
impl DrainStrategy for EnsurePodDeletion {
    async fn execute(&self, node: &Node) -> Result<DrainStrategyResult> {
        let pods = target_pods(self.store.as_ref(), node, Vec::new(), &self.filters).await?;
        let with_finalizers = filter_pods(pods.clone(), &[has_finalizers()]);

        let fin = remove_finalizers(self.store.as_ref(), &with_finalizers)
            .await
            .map_err(CuoError::from)?;
        let del = delete_pods(self.store.as_ref(), &pods, false, None)
            .await
            .map_err(CuoError::from)?;

        let mut messages = Vec::new();
        if fin.removed > 0 {
            messages.push(fin.message);
        }
        if del.marked_for_deletion > 0 {
            messages.push(del.message);
        }
        Ok(DrainStrategyResult {
            message: messages.join(" "),
            has_executed: fin.removed > 0 || del.marked_for_deletion > 0,
        })
    }

    /// Any matching pod left means the deletion has not (yet) succeeded.
    async fn is_valid(&self, node: &Node) -> Result<bool> {
        let pods = target_pods(self.store.as_ref(), node, Vec::new(), &self.filters).await?;
        Ok(!pods.is_empty())
    }
}

/// Force-delete the matching pods.
pub struct PodDeletion {
    store: Arc<dyn ClusterStore>,
    filters: Vec<PodPredicate>,
}

impl PodDeletion {
    pub fn new(store: Arc<dyn ClusterStore>, filters: Vec<PodPredicate>) -> Self {
        Self { store, filters }
    }
}

#[async_trait]
impl DrainStrategy for PodDeletion {
    async fn execute(&self, node: &Node) -> Result<DrainStrategyResult> {
        let pods = target_pods(self.store.as_ref(), node, Vec::new(), &self.filters).await?;
        let res = delete_pods(self.store.as_ref(), &pods, true, Some(0))
            .await
            .map_err(CuoError::from)?;
        Ok(DrainStrategyResult {
            message: res.message,
            has_executed: res.marked_for_deletion > 0,
        })
    }

    async fn is_valid(&self, node: &Node) -> Result<bool> {
        let pods = target_pods(self.store.as_ref(), node, Vec::new(), &self.filters).await?;
        Ok(!pods.is_empty())
    }
}

/// Clear finalizers on matching pods so pending deletions can complete.
pub struct RemoveFinalizers {
    store: Arc<dyn ClusterStore>,
    filters: Vec<PodPredicate>,
}

impl RemoveFinalizers {
    pub fn new(store: Arc<dyn ClusterStore>, filters: Vec<PodPredicate>) -> Self {
        Self { store, filters }
    }

    async fn targets(&self, node: &Node) -> Result<Vec<Pod>> {
        target_pods(
            self.store.as_ref(),
            node,
            vec![has_finalizers()],
            &self.filters,
        )
        .await
    }
}

#[async_trait]
impl DrainStrategy for RemoveFinalizers {
    async fn execute(&self, node: &Node) -> Result<DrainStrategyResult> {
        let pods = self.targets(node).await?;
        let res = remove_finalizers(self.store.as_ref(), &pods)
            .await
            .map_err(CuoError::from)?;
        Ok(DrainStrategyResult {
            message: res.message,
            has_executed: res.removed > 0,
        })
    }

    async fn is_valid(&self, node: &Node) -> Result<bool> {
        Ok(!self.targets(node).await?.is_empty())
    }
}

/// Force-delete pods that are terminating with nothing left holding them.
pub struct StuckTerminating {
    store: Arc<dyn ClusterStore>,
    filters: Vec<PodPredicate>,
}

impl StuckTerminating {
    pub fn new(store: Arc<dyn ClusterStore>, filters: Vec<PodPredicate>) -> Self {
        Self { store, filters }
    }

    async fn targets(&self, node: &Node) -> Result<Vec<Pod>> {
        target_pods(
            self.store.as_ref(),
            node,
            vec![has_no_finalizers(), is_terminating()],
            &self.filters,
        )
        .await
    }
}

#[async_trait]
impl DrainStrategy for StuckTerminating {
    async fn execute(&self, node: &Node) -> Result<DrainStrategyResult> {
        let pods = self.targets(node).await?;
        let res = delete_pods(self.store.as_ref(), &pods, false, Some(0))
            .await
            .map_err(CuoError::from)?;
        Ok(DrainStrategyResult {
            message: res.message,
            has_executed: res.marked_for_deletion > 0,
        })
    }

    async fn is_valid(&self, node: &Node) -> Result<bool> {
        Ok(!self.targets(node).await?.is_empty())
    }
}
