//! `UpgradeConfig` CRD type definition and the OpenShift resources it drives.

pub mod openshift;
pub mod spec;
pub mod status;
pub mod types;

pub use openshift::{
    ClusterOperator, ClusterVersion, Machine, MachineConfigPool, MachineSet, MachineSetSpec,
    Release,
};
pub use spec::{UpgradeConfig, UpgradeConfigSpec, UpgradeSource, Update};
pub use status::{UpgradeCondition, UpgradeConfigStatus, UpgradeHistory};
pub use types::{ConditionStatus, UpgradePhase, UpgradeType, step};
