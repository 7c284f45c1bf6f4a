//! Notification module for upgrade lifecycle events.

pub mod slack;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub use slack::{SlackMessage, SlackNotifier};

/// Lifecycle states reported to the cluster owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    Started,
    Delayed,
    Skipped,
    ControlPlaneStarted,
    ControlPlaneFinished,
    WorkersFinished,
    Completed,
    Failed,
}

impl std::fmt::Display for NotifyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "Started",
            Self::Delayed => "Delayed",
            Self::Skipped => "Skipped",
            Self::ControlPlaneStarted => "ControlPlaneStarted",
            Self::ControlPlaneFinished => "ControlPlaneFinished",
            Self::WorkersFinished => "WorkersFinished",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// One notification about an UpgradeConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeEvent {
    pub state: NotifyState,
    pub upgradeconfig: String,
    pub version: String,
    pub description: String,
}

impl UpgradeEvent {
    pub fn new(
        state: NotifyState,
        upgradeconfig: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            state,
            upgradeconfig: upgradeconfig.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &UpgradeEvent) -> Result<()>;
}

/// Notifier used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &UpgradeEvent) -> Result<()> {
        info!(
            upgradeconfig = %event.upgradeconfig,
            version = %event.version,
            state = %event.state,
            "{}",
            event.description
        );
        Ok(())
    }
}

/// Build the Slack message for an event.
pub fn build_message(event: &UpgradeEvent) -> SlackMessage {
    let header = match event.state {
        NotifyState::Started => "Cluster Upgrade Started",
        NotifyState::Delayed => "Cluster Upgrade Delayed",
        NotifyState::Skipped => "Cluster Upgrade Capacity Skipped",
        NotifyState::ControlPlaneStarted => "Control Plane Upgrade Started",
        NotifyState::ControlPlaneFinished => "Control Plane Upgrade Finished",
        NotifyState::WorkersFinished => "Worker Upgrade Finished",
        NotifyState::Completed => "Cluster Upgrade Completed",
        NotifyState::Failed => "Cluster Upgrade Failed",
    };

    let mut fields = vec![
        ("Version".to_string(), event.version.clone()),
        ("State".to_string(), event.state.to_string()),
    ];
    if !event.description.is_empty() {
        fields.push(("Details".to_string(), event.description.clone()));
    }

    SlackMessage {
        header: header.to_string(),
        fields,
        context: format!("Sent by cuo via UpgradeConfig/{}", event.upgradeconfig),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_started_message() {
        let event = UpgradeEvent::new(
            NotifyState::Started,
            "managed-upgrade-config",
            "4.15.3",
            "Cluster is being upgraded to version 4.15.3",
        );
        let msg = build_message(&event);
        assert_eq!(msg.header, "Cluster Upgrade Started");
        assert!(msg.fields.iter().any(|(k, v)| k == "Version" && v == "4.15.3"));
        assert!(msg.fields.iter().any(|(k, _)| k == "Details"));
        assert!(msg.context.contains("UpgradeConfig/managed-upgrade-config"));
    }

    #[test]
    fn test_build_message_without_description() {
        let event = UpgradeEvent::new(NotifyState::Failed, "uc", "4.15.3", "");
        let msg = build_message(&event);
        assert_eq!(msg.header, "Cluster Upgrade Failed");
        assert_eq!(msg.fields.len(), 2);
        assert!(msg.fields.iter().any(|(k, v)| k == "State" && v == "Failed"));
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let event = UpgradeEvent::new(NotifyState::Completed, "uc", "4.15.3", "done");
        assert!(LogNotifier.notify(&event).await.is_ok());
    }
}
