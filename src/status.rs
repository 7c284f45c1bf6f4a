//! Upgrade phase helpers and Kubernetes event recording.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

use crate::crd::{UpgradeConfig, UpgradeHistory, UpgradePhase};

/// History entry of the version `uc` currently asks for.
pub fn desired_history(uc: &UpgradeConfig) -> Option<&UpgradeHistory> {
    uc.status
        .as_ref()
        .and_then(|s| s.history(uc.desired_version()))
}

/// Phase of the desired version; `New` until an entry exists.
pub fn desired_phase(uc: &UpgradeConfig) -> UpgradePhase {
    desired_history(uc).map_or(UpgradePhase::New, |h| h.phase)
}

/// A version other than the desired one is still Upgrading.
pub fn other_upgrade_in_progress(uc: &UpgradeConfig) -> Option<&str> {
    uc.status
        .as_ref()
        .and_then(|s| s.upgrading_version())
        .filter(|v| *v != uc.desired_version())
}

/// Kubernetes event to publish against an UpgradeConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub warning: bool,
    pub reason: &'static str,
    pub message: String,
}

impl StatusEvent {
    pub fn normal(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            warning: false,
            reason,
            message: message.into(),
        }
    }

    pub fn warning(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            warning: true,
            reason,
            message: message.into(),
        }
    }
}

/// Event recorder bundled with its target `ObjectReference`.
pub struct EventRecorder {
    recorder: Recorder,
    obj_ref: ObjectReference,
}

impl EventRecorder {
    /// Create an event recorder for the given `UpgradeConfig` resource.
    pub fn new(client: kube::Client, obj: &UpgradeConfig) -> Self {
        let reporter = Reporter {
            controller: "cuo".into(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
            obj_ref: obj.object_ref(&()),
        }
    }

    /// Publish an event. Failures are logged only.
    pub async fn publish(&self, event: &StatusEvent) {
        let type_ = if event.warning {
            EventType::Warning
        } else {
            EventType::Normal
        };
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.into(),
                    note: Some(event.message.clone()),
                    action: event.reason.into(),
                    secondary: None,
                },
                &self.obj_ref,
            )
            .await
            .unwrap_or_else(|e| warn!(reason = event.reason, error = %e, "Failed to publish event"));
    }
}
