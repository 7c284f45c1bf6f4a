//! Composition of action strategies with wait durations and the escalation policy.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info};

use super::{DrainStrategy, DrainStrategyResult};
use crate::error::{CuoError, PodErrors};
use crate::machinery::node_name;

/// An action strategy that becomes eligible `wait` after the node was cordoned.
pub struct TimedDrainStrategy {
    pub name: &'static str,
    pub description: &'static str,
    pub wait: Duration,
    pub strategy: Box<dyn DrainStrategy>,
}

impl TimedDrainStrategy {
    pub fn new(
        name: &'static str,
        description: &'static str,
        wait: Duration,
        strategy: impl DrainStrategy + 'static,
    ) -> Self {
        Self {
            name,
            description,
            wait,
            strategy: Box::new(strategy),
        }
    }
}

impl std::fmt::Debug for TimedDrainStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedDrainStrategy")
            .field("name", &self.name)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

/// `anchor + wait` lies strictly in the past.
fn is_after(anchor: DateTime<Utc>, wait: Duration, now: DateTime<Utc>) -> bool {
    anchor + wait < now
}

/// Ordered set of timed strategies for one node plus the global drain budget.
#[derive(Debug)]
pub struct TimedDrainComposer {
    strategies: Vec<TimedDrainStrategy>,
    timeout: Duration,
    expected_drain: Duration,
}

impl TimedDrainComposer {
    /// Strategies are kept sorted by ascending wait.
    pub fn new(
        mut strategies: Vec<TimedDrainStrategy>,
        timeout: Duration,
        expected_drain: Duration,
    ) -> Self {
        strategies.sort_by_key(|s| s.wait);
        Self {
            strategies,
            timeout,
            expected_drain,
        }
    }

    pub fn strategies(&self) -> &[TimedDrainStrategy] {
        &self.strategies
    }

    /// Run every strategy whose wait has elapsed. Strategies not yet due are not touched.
    ///
    /// Each due strategy runs even if an earlier one failed; failures are combined.
    pub async fn execute(
        &self,
        node: &Node,
        cordoned_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DrainStrategyResult>> {
        let node_name = node_name(node);
        let mut results = Vec::new();
        let mut errors = PodErrors::new();

        for timed in &self.strategies {
            let due_at = cordoned_at + timed.wait;
            if !is_after(cordoned_at, timed.wait, now) {
                debug!(
                    node = node_name,
                    strategy = timed.name,
                    due_at = %due_at,
                    "Drain strategy not yet due"
                );
                continue;
            }

            info!(node = node_name, strategy = timed.name, "Executing drain strategy");
            match timed.strategy.execute(node).await {
                Ok(r) if r.has_executed => results.push(DrainStrategyResult {
                    message: format!(
                        "Drain strategy {} has been executed. {}",
                        timed.description, r.message
                    ),
                    has_executed: true,
                }),
                Ok(_) => {}
                Err(e) => errors.push(format!("{}: {e:#}", timed.name)),
            }
        }

        errors.into_result().map_err(CuoError::from)?;
        Ok(results)
    }

    /// Escalation policy.
    ///
    /// With no strategies the drain fails once the global timeout passes. Otherwise
    /// it never fails while a strategy still ahead has target pods. Once none do,
    /// the bound is the larger of the global timeout and the wait of the last
    /// executed strategy plus the expected drain time.
    pub async fn has_failed(
        &self,
        node: &Node,
        cordoned_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        if self.strategies.is_empty() {
            return Ok(is_after(cordoned_at, self.timeout, now));
        }

        let (executed, pending): (Vec<_>, Vec<_>) = self
            .strategies
            .iter()
            .partition(|s| is_after(cordoned_at, s.wait, now));

        for timed in &pending {
            if timed.strategy.is_valid(node).await? {
                debug!(
                    node = node_name(node),
                    strategy = timed.name,
                    "Pending drain strategy still has work, not failing"
                );
                return Ok(false);
            }
        }

        let bound = executed.last().map_or(self.timeout, |last| {
            self.timeout.max(last.wait + self.expected_drain)
        });
        Ok(is_after(cordoned_at, bound, now))
    }
}
