//! `UpgradeConfig` spec types.

use chrono::{DateTime, Duration, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::UpgradeConfigStatus;
use super::types::UpgradeType;
use crate::error::CuoError;

/// `UpgradeConfig` spec defines the desired version of a managed cluster and how
/// the upgrade towards it should behave.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "upgrade.managed.openshift.io",
    version = "v1alpha1",
    kind = "UpgradeConfig",
    namespaced,
    status = "UpgradeConfigStatus",
    printcolumn = r#"{"name":"DESIRED","type":"string","jsonPath":".spec.desired.version"}"#,
    printcolumn = r#"{"name":"PHASE","type":"string","jsonPath":".status.history[0].phase"}"#,
    printcolumn = r#"{"name":"STAGE","type":"string","jsonPath":".status.history[0].conditions[0].type"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfigSpec {
    /// Target version and the source used to reach it.
    pub desired: Update,

    /// RFC3339 timestamp at which the upgrade may begin.
    pub upgrade_at: String,

    /// Minutes to wait before force-draining pods protected by a PDB.
    #[serde(rename = "PDBForceDrainTimeout")]
    pub pdb_force_drain_timeout: i32,

    /// Cluster flavour.
    #[serde(default, rename = "type")]
    pub upgrade_type: UpgradeType,

    /// Add a temporary worker per machine pool while the upgrade runs.
    #[serde(default)]
    pub capacity_reservation: bool,
}

/// Desired release. Either `image`, or `channel` + `version`, must be set.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub version: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub force: bool,
}

/// How the desired release is handed to the ClusterVersion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpgradeSource<'a> {
    Image(&'a str),
    ChannelVersion { channel: &'a str, version: &'a str },
}

impl Update {
    pub fn source(&self) -> Result<UpgradeSource<'_>, CuoError> {
        if let Some(image) = self.image.as_deref().filter(|i| !i.is_empty()) {
            return Ok(UpgradeSource::Image(image));
        }
        if !self.channel.is_empty() && !self.version.is_empty() {
            return Ok(UpgradeSource::ChannelVersion {
                channel: &self.channel,
                version: &self.version,
            });
        }
        Err(CuoError::UpgradeSource(
            "cannot find the correct upgrade spec source".into(),
        ))
    }
}

impl UpgradeConfigSpec {
    pub fn upgrade_at_time(&self) -> Result<DateTime<Utc>, CuoError> {
        DateTime::parse_from_rfc3339(&self.upgrade_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CuoError::InvalidConfig(format!("upgradeAt {:?}: {e}", self.upgrade_at)))
    }

    pub fn pdb_drain_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.pdb_force_drain_timeout))
    }
}

impl UpgradeConfig {
    pub fn desired_version(&self) -> &str {
        &self.spec.desired.version
    }
}
