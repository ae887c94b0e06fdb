/// Audit trail for rule changes
///
/// Every block, removal and toggle is appended as one JSON object per line to
/// `audit.log` in the state directory. Writing the audit trail never fails the
/// operation being audited.
use crate::core::backend::BackendPath;
use crate::core::orchestrator::{BlockReport, RemovalReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BlockApplication,
    RemoveApplication,
    RemoveRule,
    ToggleRule,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    /// False when any rule in the operation failed on both backends
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event as one JSON line
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Most recent events first, skipping lines that fail to parse
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        Ok(content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Writes the event, downgrading failures to a warning
    pub async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event).await {
            tracing::warn!("Failed to write audit log: {e}");
        }
    }
}

pub fn block_event(report: &BlockReport) -> AuditEvent {
    AuditEvent::new(
        EventType::BlockApplication,
        report.failures.is_empty() && report.collisions.is_empty(),
        serde_json::json!({
            "application": report.application,
            "files": report.files.len(),
            "created": report.created.len(),
            "via_fallback": report.fallback_count(),
            "failed": report
                .failures
                .iter()
                .map(|f| f.display_name.as_str())
                .collect::<Vec<_>>(),
            "skipped": report
                .collisions
                .iter()
                .map(|c| c.file.display().to_string())
                .collect::<Vec<_>>(),
            "cancelled": report.cancelled,
        }),
        report.warning.clone(),
    )
}

pub fn removal_event(report: &RemovalReport) -> AuditEvent {
    AuditEvent::new(
        EventType::RemoveApplication,
        report.failures.is_empty(),
        serde_json::json!({
            "application": report.application,
            "candidates": report.candidates,
            "removed": report.removed,
            "failed": report
                .failures
                .iter()
                .map(|f| f.display_name.as_str())
                .collect::<Vec<_>>(),
        }),
        None,
    )
}

pub fn rule_event(
    event_type: EventType,
    display_name: &str,
    outcome: &crate::Result<BackendPath>,
    enabled: Option<bool>,
) -> AuditEvent {
    let mut details = serde_json::json!({ "display_name": display_name });
    if let Some(enabled) = enabled {
        details["enabled"] = serde_json::Value::Bool(enabled);
    }
    if let Ok(via) = outcome {
        details["via"] = serde_json::Value::String(via.to_string());
    }

    AuditEvent::new(
        event_type,
        outcome.is_ok(),
        details,
        outcome.as_ref().err().map(ToString::to_string),
    )
}

/// Logs a block operation
pub async fn log_block(report: &BlockReport) {
    if let Ok(audit) = AuditLog::new() {
        audit.record(block_event(report)).await;
    }
}

/// Logs an application removal
pub async fn log_remove_application(report: &RemovalReport) {
    if let Ok(audit) = AuditLog::new() {
        audit.record(removal_event(report)).await;
    }
}

/// Logs a single rule removal
pub async fn log_remove_rule(display_name: &str, outcome: &crate::Result<BackendPath>) {
    if let Ok(audit) = AuditLog::new() {
        audit
            .record(rule_event(EventType::RemoveRule, display_name, outcome, None))
            .await;
    }
}

/// Logs an enable or disable
pub async fn log_toggle(display_name: &str, enabled: bool, outcome: &crate::Result<BackendPath>) {
    if let Ok(audit) = AuditLog::new() {
        audit
            .record(rule_event(
                EventType::ToggleRule,
                display_name,
                outcome,
                Some(enabled),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orchestrator::{NameCollision, RuleFailure};

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            EventType::RemoveRule,
            false,
            serde_json::json!({"display_name": "FwBlock - Foo - Foo.exe (Inbound)"}),
            Some("No rules match".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("remove_rule"));
        assert!(json.contains("No rules match"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","event_type":"block_application","success":true,"details":{},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert_eq!(event.event_type, EventType::BlockApplication);
    }

    #[test]
    fn test_block_event_reports_failures() {
        let report = BlockReport {
            application: "Foo".to_string(),
            failures: vec![RuleFailure {
                display_name: "FwBlock - Foo - Foo.exe (Inbound)".to_string(),
                primary: "denied".to_string(),
                fallback: "denied".to_string(),
                sub_errors: Vec::new(),
            }],
            ..BlockReport::default()
        };

        let event = block_event(&report);
        assert!(!event.success);
        assert_eq!(event.details["application"], "Foo");
        assert_eq!(event.details["failed"][0], "FwBlock - Foo - Foo.exe (Inbound)");
    }

    #[test]
    fn test_block_event_reports_skipped_files() {
        let report = BlockReport {
            application: "Suite".to_string(),
            collisions: vec![NameCollision {
                file: PathBuf::from("Suite/bin/a.exe"),
                blocked_by: PathBuf::from("Suite/a.exe"),
            }],
            ..BlockReport::default()
        };

        let event = block_event(&report);
        assert!(!event.success);
        assert_eq!(
            event.details["skipped"][0],
            PathBuf::from("Suite/bin/a.exe").display().to_string()
        );
    }

    #[test]
    fn test_rule_event_records_path_taken() {
        let event = rule_event(
            EventType::ToggleRule,
            "FwBlock - Foo - Foo.exe (Inbound)",
            &Ok(BackendPath::Fallback),
            Some(false),
        );
        assert!(event.success);
        assert_eq!(event.details["via"], "fallback");
        assert_eq!(event.details["enabled"], false);
    }

    #[tokio::test]
    async fn test_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));

        audit.record(removal_event(&RemovalReport::default())).await;
        audit
            .record(rule_event(
                EventType::RemoveRule,
                "FwBlock - Foo - a.exe (Inbound)",
                &Err(crate::Error::Internal("boom".to_string())),
                None,
            ))
            .await;

        let recent = audit.read_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, EventType::RemoveRule);
        assert!(!recent[0].success);
        assert_eq!(recent[1].event_type, EventType::RemoveApplication);
    }
}
