//! Worker data model: capabilities, statuses, and the registry entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::WorkerConnection;

/// Live status of a registered worker. Offline workers are simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Ready to accept a task.
    Idle,
    /// Running a task (or otherwise occupied).
    Busy,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Tooling advertised by a worker container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub build_tools: Vec<String>,
    #[serde(default)]
    pub test_frameworks: Vec<String>,
}

impl Capabilities {
    /// Whether a task targeting `language` can run on this worker.
    ///
    /// TypeScript and JavaScript satisfy each other; everything else is an
    /// exact (case-insensitive) membership test.
    pub fn supports_language(&self, language: &str) -> bool {
        let wanted = language.trim().to_ascii_lowercase();
        self.languages.iter().any(|declared| {
            let declared = declared.trim().to_ascii_lowercase();
            declared == wanted || (is_js_family(&declared) && is_js_family(&wanted))
        })
    }
}

fn is_js_family(language: &str) -> bool {
    matches!(language, "typescript" | "javascript")
}

/// A connected worker container.
#[derive(Debug)]
pub struct Worker {
    pub id: String,
    pub language_type: String,
    pub capabilities: Capabilities,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    /// Owning handle to the worker's connection.
    pub connection: WorkerConnection,
}

impl Worker {
    /// A freshly registered, idle worker.
    pub fn new(
        id: impl Into<String>,
        language_type: impl Into<String>,
        capabilities: Capabilities,
        connection: WorkerConnection,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            language_type: language_type.into(),
            capabilities,
            status: WorkerStatus::Idle,
            current_task: None,
            last_heartbeat: now,
            registered_at: now,
            connection,
        }
    }

    /// Idle and free of any assignment.
    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Idle && self.current_task.is_none()
    }

    /// Serializable view without the connection handle.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            language_type: self.language_type.clone(),
            capabilities: self.capabilities.clone(),
            status: self.status,
            current_task: self.current_task.clone(),
            last_heartbeat: self.last_heartbeat,
            registered_at: self.registered_at,
        }
    }
}

/// Point-in-time view of a worker for the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub id: String,
    pub language_type: String,
    pub capabilities: Capabilities,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(languages: &[&str]) -> Capabilities {
        Capabilities {
            languages: languages.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn typescript_worker_runs_javascript() {
        assert!(caps(&["typescript"]).supports_language("javascript"));
        assert!(caps(&["javascript"]).supports_language("typescript"));
    }

    #[test]
    fn exact_membership_otherwise() {
        let c = caps(&["python", "rust"]);
        assert!(c.supports_language("python"));
        assert!(c.supports_language("Rust"));
        assert!(!c.supports_language("go"));
        assert!(!c.supports_language("javascript"));
    }

    #[test]
    fn no_languages_supports_nothing() {
        assert!(!Capabilities::default().supports_language("python"));
    }

    #[test]
    fn capabilities_deserialize_from_camel_case() {
        let c: Capabilities = serde_json::from_str(
            r#"{"languages":["python"],"buildTools":["pip"],"testFrameworks":["pytest"]}"#,
        )
        .unwrap();
        assert_eq!(c.build_tools, vec!["pip"]);
        assert_eq!(c.test_frameworks, vec!["pytest"]);
    }

    #[test]
    fn capabilities_fields_are_optional() {
        let c: Capabilities = serde_json::from_str(r#"{"languages":["go"]}"#).unwrap();
        assert!(c.build_tools.is_empty());
    }
}
