//! `UpgradeConfig` status types: per-version history and step conditions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConditionStatus, UpgradePhase};

/// Persisted state of one step (or policy decision) within an upgrade.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeCondition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "lastProbeTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_checked_time: Option<DateTime<Utc>>,
}

impl UpgradeCondition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            start_time: None,
            complete_time: None,
            last_transition_time: None,
            last_checked_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upgrade record for a single desired version.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHistory {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preceding_version: Option<String>,
    #[serde(default)]
    pub phase: UpgradePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_complete_time: Option<DateTime<Utc>>,
    /// Most recently updated condition first.
    #[serde(default)]
    pub conditions: Vec<UpgradeCondition>,
}

impl UpgradeHistory {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn condition(&self, condition_type: &str) -> Option<&UpgradeCondition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    /// Insert or refresh a condition and move it to the front.
    ///
    /// `lastTransitionTime` only moves when the status actually changes;
    /// `last_checked_time` is refreshed on every call.
    pub fn set_condition(&mut self, mut condition: UpgradeCondition, now: DateTime<Utc>) {
        match self
            .conditions
            .iter()
            .position(|c| c.r#type == condition.r#type)
        {
            Some(idx) => {
                let existing = self.conditions.remove(idx);
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.or(Some(now))
                } else {
                    Some(now)
                };
            }
            None => condition.last_transition_time = Some(now),
        }
        condition.last_checked_time = Some(now);
        self.conditions.insert(0, condition);
    }
}

/// `UpgradeConfig` status defines the observed state of every upgrade attempted.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfigStatus {
    /// Newest entry first.
    #[serde(default)]
    pub history: Vec<UpgradeHistory>,
}

impl UpgradeConfigStatus {
    pub fn history(&self, version: &str) -> Option<&UpgradeHistory> {
        self.history.iter().find(|h| h.version == version)
    }

    pub fn history_mut(&mut self, version: &str) -> Option<&mut UpgradeHistory> {
        self.history.iter_mut().find(|h| h.version == version)
    }

    /// Replace the entry for `history.version`, or record it as the newest entry.
    pub fn set_history(&mut self, history: UpgradeHistory) {
        match self.history_mut(&history.version) {
            Some(existing) => *existing = history,
            None => self.history.insert(0, history),
        }
    }

    /// Entry for `version`, created with phase New if this version was never seen.
    pub fn ensure_history(&mut self, version: &str) -> &mut UpgradeHistory {
        if let Some(idx) = self.history.iter().position(|h| h.version == version) {
            return &mut self.history[idx];
        }
        self.history.insert(0, UpgradeHistory::new(version));
        &mut self.history[0]
    }

    /// Version currently in the Upgrading phase, if any.
    pub fn upgrading_version(&self) -> Option<&str> {
        self.history
            .iter()
            .find(|h| h.phase == UpgradePhase::Upgrading)
            .map(|h| h.version.as_str())
    }
}
