//! Alertmanager API v2 client for silences and alerts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Alert, AlertSource, Maintenance};
use crate::error::CuoError;

/// `createdBy` on every silence this operator owns.
pub const OPERATOR_NAME: &str = "managed-upgrade-operator";

const CONTROL_PLANE_COMMENT_ID: &str = "OSD control plane";
const WORKER_COMMENT_ID: &str = "OSD worker node";
const ACTIVE: &str = "active";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    pub name: String,
    pub value: String,
    pub is_regex: bool,
}

impl Matcher {
    fn regex(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            is_regex: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    pub matchers: Vec<Matcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableSilence {
    pub id: String,
    #[serde(default)]
    pub status: SilenceStatus,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SilenceStatus {
    #[serde(default)]
    pub state: String,
}

impl GettableSilence {
    fn is_active(&self) -> bool {
        self.status.state == ACTIVE
    }

    fn is_ours(&self) -> bool {
        self.created_by == OPERATOR_NAME
    }
}

#[derive(Debug, Deserialize)]
struct GettableAlert {
    #[serde(default)]
    labels: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SilenceCreated {
    #[serde(default)]
    silence_id: String,
}

pub fn control_plane_comment(version: &str) -> String {
    format!("Silence for {CONTROL_PLANE_COMMENT_ID} upgrade to version {version}")
}

pub fn control_plane_critical_comment(version: &str) -> String {
    format!(
        "Silence for critical alerts during {CONTROL_PLANE_COMMENT_ID} upgrade to version {version}"
    )
}

pub fn worker_comment(version: &str) -> String {
    format!("Silence for {WORKER_COMMENT_ID} upgrade to version {version}")
}

pub fn worker_full_comment(version: &str, pending: i32) -> String {
    format!("{} with remaining {pending} nodes", worker_comment(version))
}

/// Upgrades disturb availability enough to raise warning/info alerts in
/// platform namespaces. Those are always silenced.
pub fn default_matchers() -> Vec<Matcher> {
    vec![
        Matcher::regex("severity", "(warning|info)"),
        Matcher::regex("namespace", "(^openshift.*|^kube.*|^redhat.*|^default$)"),
    ]
}

/// Matcher for the critical alerts expected while the control plane rolls.
pub fn ignored_critical_matchers(ignored: &[String]) -> Option<Vec<Matcher>> {
    if ignored.is_empty() {
        return None;
    }
    Some(vec![Matcher::regex(
        "alertname",
        format!("({})", ignored.join("|")),
    )])
}

/// IDs of our active silences whose comment mentions `comment_id`.
pub fn silences_to_end<'a>(silences: &'a [GettableSilence], comment_id: &str) -> Vec<&'a str> {
    silences
        .iter()
        .filter(|s| s.is_ours() && s.is_active() && s.comment.contains(comment_id))
        .map(|s| s.id.as_str())
        .collect()
}

pub struct AlertmanagerClient {
    base_url: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

impl AlertmanagerClient {
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}/api/v2{path}", self.base_url));
        match &self.token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }

    async fn list_silences(&self) -> Result<Vec<GettableSilence>> {
        let resp = self
            .request(reqwest::Method::GET, "/silences")
            .send()
            .await
            .context("Failed to list silences")?
            .error_for_status()
            .map_err(|e| CuoError::Maintenance(format!("list silences: {e}")))?;
        resp.json().await.context("Failed to decode silences")
    }

    async fn create_silence(
        &self,
        matchers: Vec<Matcher>,
        ends_at: DateTime<Utc>,
        comment: String,
    ) -> Result<()> {
        let silence = PostableSilence {
            matchers,
            starts_at: Utc::now(),
            ends_at,
            created_by: OPERATOR_NAME.to_string(),
            comment,
        };
        let resp = self
            .request(reqwest::Method::POST, "/silences")
            .json(&silence)
            .send()
            .await
            .context("Failed to create silence")?
            .error_for_status()
            .map_err(|e| CuoError::Maintenance(format!("create silence: {e}")))?;
        let created: SilenceCreated = resp.json().await.context("Failed to decode silence")?;
        info!(id = %created.silence_id, comment = %silence.comment, ends_at = %ends_at, "Created silence");
        Ok(())
    }

    async fn delete_silence(&self, id: &str) -> Result<()> {
        self.request(reqwest::Method::DELETE, &format!("/silence/{id}"))
            .send()
            .await
            .context("Failed to delete silence")?
            .error_for_status()
            .map_err(|e| CuoError::Maintenance(format!("delete silence {id}: {e}")))?;
        debug!(id, "Deleted silence");
        Ok(())
    }

    async fn end_silences(&self, comment_id: &str) -> Result<()> {
        let silences = self.list_silences().await?;
        let mut errors = Vec::new();
        for id in silences_to_end(&silences, comment_id) {
            if let Err(e) = self.delete_silence(id).await {
                errors.push(format!("{e:#}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CuoError::Maintenance(errors.join("; ")).into())
        }
    }
}

#[async_trait]
impl Maintenance for AlertmanagerClient {
    async fn start_control_plane(
        &self,
        ends_at: DateTime<Utc>,
        version: &str,
        ignored_alerts: &[String],
    ) -> Result<()> {
        let default_comment = control_plane_comment(version);
        let critical_comment = control_plane_critical_comment(version);
        let silences = self.list_silences().await?;
        let default_exists = silences.iter().any(|s| s.comment == default_comment);
        let critical_exists = silences.iter().any(|s| s.comment == critical_comment);

        if !default_exists {
            self.create_silence(default_matchers(), ends_at, default_comment)
                .await?;
        }
        if !critical_exists && let Some(matchers) = ignored_critical_matchers(ignored_alerts) {
            self.create_silence(matchers, ends_at, critical_comment)
                .await?;
        }
        Ok(())
    }

    async fn set_worker(&self, ends_at: DateTime<Utc>, version: &str, pending: i32) -> Result<()> {
        let full_comment = worker_full_comment(version, pending);
        let silences = self.list_silences().await?;
        if silences.iter().any(|s| s.comment == full_comment) {
            return Ok(());
        }

        let comment = worker_comment(version);
        if let Some(old) = silences
            .iter()
            .find(|s| s.is_active() && s.comment.contains(&comment))
        {
            self.delete_silence(&old.id).await?;
        }
        self.create_silence(default_matchers(), ends_at, full_comment)
            .await
    }

    async fn end_control_plane(&self) -> Result<()> {
        self.end_silences(CONTROL_PLANE_COMMENT_ID).await
    }

    async fn end_worker(&self) -> Result<()> {
        self.end_silences(WORKER_COMMENT_ID).await
    }

    async fn is_active(&self) -> Result<bool> {
        let silences = self.list_silences().await?;
        Ok(silences.iter().any(|s| s.is_active() && s.is_ours()))
    }
}

#[async_trait]
impl AlertSource for AlertmanagerClient {
    async fn firing_critical_alerts(&self) -> Result<Vec<Alert>> {
        let resp = self
            .request(reqwest::Method::GET, "/alerts")
            .query(&[
                ("active", "true"),
                ("silenced", "false"),
                ("inhibited", "false"),
                ("filter", "severity=\"critical\""),
            ])
            .send()
            .await
            .context("Failed to query alerts")?
            .error_for_status()
            .map_err(|e| CuoError::Maintenance(format!("query alerts: {e}")))?;
        let alerts: Vec<GettableAlert> = resp.json().await.context("Failed to decode alerts")?;
        Ok(alerts.into_iter().map(to_alert).collect())
    }
}

fn to_alert(mut alert: GettableAlert) -> Alert {
    Alert {
        name: alert.labels.remove("alertname").unwrap_or_default(),
        namespace: alert.labels.remove("namespace"),
        severity: alert.labels.remove("severity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(id: &str, state: &str, by: &str, comment: &str) -> GettableSilence {
        GettableSilence {
            id: id.into(),
            status: SilenceStatus {
                state: state.into(),
            },
            comment: comment.into(),
            created_by: by.into(),
        }
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            control_plane_comment("4.15.3"),
            "Silence for OSD control plane upgrade to version 4.15.3"
        );
        assert_eq!(
            worker_full_comment("4.15.3", 4),
            "Silence for OSD worker node upgrade to version 4.15.3 with remaining 4 nodes"
        );
    }

    #[test]
    fn test_ignored_critical_matchers() {
        assert!(ignored_critical_matchers(&[]).is_none());
        let m =
            ignored_critical_matchers(&["etcdMembersDown".into(), "KubeAPIDown".into()]).unwrap();
        assert_eq!(m[0].name, "alertname");
        assert_eq!(m[0].value, "(etcdMembersDown|KubeAPIDown)");
        assert!(m[0].is_regex);
    }

    #[test]
    fn test_silences_to_end_only_ours_and_active() {
        let silences = vec![
            silence("1", "active", OPERATOR_NAME, &control_plane_comment("4.15.3")),
            silence("2", "expired", OPERATOR_NAME, &control_plane_comment("4.15.2")),
            silence("3", "active", "someone", &control_plane_comment("4.15.3")),
            silence("4", "active", OPERATOR_NAME, &worker_full_comment("4.15.3", 2)),
        ];
        assert_eq!(silences_to_end(&silences, CONTROL_PLANE_COMMENT_ID), vec!["1"]);
        assert_eq!(silences_to_end(&silences, WORKER_COMMENT_ID), vec!["4"]);
    }

    #[test]
    fn test_postable_silence_wire_format() {
        let silence = PostableSilence {
            matchers: default_matchers(),
            starts_at: DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            ends_at: DateTime::parse_from_rfc3339("2026-05-01T11:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            created_by: OPERATOR_NAME.into(),
            comment: control_plane_comment("4.15.3"),
        };
        let v = serde_json::to_value(&silence).unwrap();
        assert_eq!(v["createdBy"], "managed-upgrade-operator");
        assert_eq!(v["matchers"][0]["isRegex"], true);
        assert_eq!(v["matchers"][1]["name"], "namespace");
        assert!(v["endsAt"].as_str().unwrap().starts_with("2026-05-01T11:00:00"));
    }

    #[test]
    fn test_decode_alerts() {
        let raw = r#"[{"labels":{"alertname":"KubeNodeNotReady","namespace":"openshift-monitoring","severity":"critical"},"status":{"state":"active"}}]"#;
        let alerts: Vec<GettableAlert> = serde_json::from_str(raw).unwrap();
        let alert = to_alert(alerts.into_iter().next().unwrap());
        assert_eq!(alert.name, "KubeNodeNotReady");
        assert_eq!(alert.namespace.as_deref(), Some("openshift-monitoring"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = AlertmanagerClient::new("https://am.example:9094/", None);
        assert_eq!(client.base_url, "https://am.example:9094");
    }
}
