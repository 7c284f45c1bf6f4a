//! Enum types for upgrade phases, condition status and step names.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase of one upgrade history entry.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum UpgradePhase {
    #[default]
    New,
    Pending,
    Upgrading,
    Upgraded,
    Failed,
}

impl UpgradePhase {
    /// Upgraded and Failed are never left without a new desired version.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Upgraded | Self::Failed)
    }
}

impl std::fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::Pending => write!(f, "Pending"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Upgraded => write!(f, "Upgraded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Flavour of managed cluster, selects the step list and failure policy.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum UpgradeType {
    #[default]
    #[serde(rename = "OSD")]
    Osd,
    #[serde(rename = "ARO")]
    Aro,
}

impl std::fmt::Display for UpgradeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Osd => write!(f, "OSD"),
            Self::Aro => write!(f, "ARO"),
        }
    }
}

/// Stable step names. They double as condition types in the history.
pub mod step {
    pub const SEND_STARTED_NOTIFICATION: &str = "SendStartedNotification";
    pub const UPGRADE_DELAYED_CHECK: &str = "UpgradeDelayedCheck";
    pub const IS_CLUSTER_UPGRADABLE: &str = "IsClusterUpgradable";
    pub const PRE_HEALTH_CHECK: &str = "UpgradePreHealthCheck";
    pub const EXT_DEP_AVAILABILITY_CHECK: &str = "ExtDepAvailabilityCheck";
    pub const SCALE_UP_EXTRA_NODES: &str = "UpgradeScaleUpExtraNodes";
    pub const CONTROL_PLANE_MAINT_WINDOW: &str = "ControlPlaneMaintWindow";
    pub const COMMENCE_UPGRADE: &str = "CommenceUpgrade";
    pub const CONTROL_PLANE_UPGRADED: &str = "ControlPlaneUpgraded";
    pub const REMOVE_CONTROL_PLANE_MAINT_WINDOW: &str = "RemoveControlPlaneMaintWindow";
    pub const WORKERS_MAINT_WINDOW: &str = "WorkersMaintWindow";
    pub const ALL_WORKER_NODES_UPGRADED: &str = "AllWorkerNodesUpgraded";
    pub const REMOVE_EXTRA_SCALED_NODES: &str = "RemoveExtraScaledNodes";
    pub const REMOVE_MAINT_WINDOW: &str = "RemoveMaintWindow";
    pub const POST_CLUSTER_HEALTH_CHECK: &str = "PostClusterHealthCheck";
    pub const POST_UPGRADE_PROCEDURES: &str = "PostUpgradeProcedures";
    pub const SEND_COMPLETED_NOTIFICATION: &str = "SendCompletedNotification";

    /// Condition recorded when the upgrade window policy fails an upgrade.
    pub const FAILED_UPGRADE: &str = "FailedUpgrade";
}
