//! Timed, multi-strategy node drain.
//!
//! A drain is anchored on the time a node was cordoned. Each [`TimedDrainStrategy`]
//! becomes eligible once its wait has elapsed since that anchor, so the engine keeps
//! no state of its own and can be re-entered at any point.

pub mod node;
pub mod pods;
pub mod predicates;
pub mod strategies;
pub mod timed;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;

pub use node::{DrainProfile, NodeDrain, NodeDrainStrategy};
pub use timed::{TimedDrainComposer, TimedDrainStrategy};

/// Outcome of one strategy execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStrategyResult {
    pub message: String,
    pub has_executed: bool,
}

/// A single pod-level action applied to a node.
#[async_trait]
pub trait DrainStrategy: Send + Sync {
    async fn execute(&self, node: &Node) -> Result<DrainStrategyResult>;

    /// Whether the strategy still has target pods on the node.
    async fn is_valid(&self, node: &Node) -> Result<bool>;
}
