//! Central-server notifications: best-effort event POSTs.
//!
//! The bridge's registries are the system of record; the central server
//! only gets told about registrations and task progress. Failures are
//! logged and dropped, never retried, and never delay a state transition.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::workers::model::Capabilities;

/// Request timeout for a single notification.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Event reported to the central server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CentralEvent {
    #[serde(rename_all = "camelCase")]
    ContainerRegistered {
        container_id: String,
        language_type: String,
        capabilities: Capabilities,
    },
    #[serde(rename_all = "camelCase")]
    TaskStarted {
        task_id: String,
        container_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TaskCompleted {
        task_id: String,
        container_id: String,
        result: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    TaskFailed {
        task_id: String,
        container_id: String,
        error: serde_json::Value,
    },
}

/// Posts `CentralEvent`s to `{base_url}/api/bridge/events`.
#[derive(Debug, Clone)]
pub struct CentralNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl CentralNotifier {
    /// Notifier for the given central server, or a no-op one for `None`.
    pub fn new(base_url: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: base_url
                .map(|url| format!("{}/api/bridge/events", url.trim_end_matches('/'))),
        }
    }

    /// Notifier that drops every event.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Fire-and-forget: send from a background task and log failures.
    pub fn notify(&self, event: CentralEvent) {
        if !self.is_enabled() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&event).await {
                warn!(error = %e, "Central server notification failed");
            }
        });
    }

    /// Send one event and wait for the response.
    pub async fn send(&self, event: &CentralEvent) -> Result<(), NotifyError> {
        let Some(url) = &self.endpoint else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::RequestFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::BadStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        debug!(url = %url, "Central server notified");
        Ok(())
    }
}
