//! ClusterVersion and ClusterOperator queries used by the upgrade steps.

use anyhow::Result;
use tracing::info;

use crate::crd::{ClusterVersion, Release, UpgradeConfig, UpgradeSource};
use crate::store::ClusterStore;

const COMPLETED: &str = "Completed";

fn desired_update(cv: &ClusterVersion) -> Option<&Release> {
    cv.spec.desired_update.as_ref()
}

/// The ClusterVersion already points at the desired release.
pub async fn has_upgrade_commenced(store: &dyn ClusterStore, uc: &UpgradeConfig) -> Result<bool> {
    let cv = store.get_cluster_version().await?;
    let commenced = match uc.spec.desired.source()? {
        UpgradeSource::Image(image) => desired_update(&cv).is_some_and(|d| d.image == image),
        UpgradeSource::ChannelVersion { version, .. } => {
            desired_update(&cv).is_some_and(|d| d.version == version)
        }
    };
    if commenced {
        info!(version = uc.desired_version(), "ClusterVersion already targets desired release");
    }
    Ok(commenced)
}

/// Point the ClusterVersion at the desired release.
///
/// Returns false while a channel/version target is not yet offered in
/// `availableUpdates`.
pub async fn ensure_desired_config(store: &dyn ClusterStore, uc: &UpgradeConfig) -> Result<bool> {
    let mut cv = store.get_cluster_version().await?;
    let force = uc.spec.desired.force;

    match uc.spec.desired.source()? {
        UpgradeSource::Image(image) => {
            if desired_update(&cv).is_none_or(|d| d.image != image) {
                info!(image, "Setting ClusterVersion desired image");
                store
                    .set_cluster_version_desired_update(&Release {
                        version: String::new(),
                        image: image.to_string(),
                        force,
                    })
                    .await?;
            }
            Ok(true)
        }
        UpgradeSource::ChannelVersion { channel, version } => {
            if cv.spec.channel.as_deref() != Some(channel) {
                info!(channel, version, "Setting ClusterVersion channel");
                store.set_cluster_version_channel(channel).await?;
                cv = store.get_cluster_version().await?;
            }

            let available = cv.status.as_ref().is_some_and(|s| {
                s.available_updates
                    .iter()
                    .any(|u| u.version == version && !u.image.is_empty())
            });
            if !available {
                info!(version, "Desired version is not yet an available update");
                return Ok(false);
            }

            info!(version, "Setting ClusterVersion desired version");
            store
                .set_cluster_version_desired_update(&Release {
                    version: version.to_string(),
                    image: String::new(),
                    force,
                })
                .await?;
            Ok(true)
        }
    }
}

pub fn has_upgrade_completed(cv: &ClusterVersion, uc: &UpgradeConfig) -> bool {
    cv.status.as_ref().is_some_and(|s| {
        s.history
            .iter()
            .any(|h| h.version == uc.desired_version() && h.state == COMPLETED)
    })
}

/// Version of the most recently completed update.
pub fn current_version(cv: &ClusterVersion) -> Option<&str> {
    cv.status
        .as_ref()?
        .history
        .iter()
        .filter(|h| h.state == COMPLETED)
        .max_by_key(|h| h.completion_time)
        .map(|h| h.version.as_str())
}

/// When the update towards `version` started, per the ClusterVersion history.
pub fn update_started_at(
    cv: &ClusterVersion,
    version: &str,
) -> Option<chrono::DateTime<chrono::Utc>> {
    cv.status
        .as_ref()?
        .history
        .iter()
        .find(|h| h.version == version)
        .and_then(|h| h.started_time)
}

/// Names of ClusterOperators that are degraded or unavailable.
pub async fn degraded_operators(store: &dyn ClusterStore) -> Result<Vec<String>> {
    let operators = store.list_cluster_operators().await?;
    Ok(operators
        .iter()
        .filter(|co| co.condition_is("Degraded", "True") || co.condition_is("Available", "False"))
        .filter_map(|co| co.metadata.name.clone())
        .collect())
}
