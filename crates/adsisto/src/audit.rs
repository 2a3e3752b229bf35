//! Audit log for authentication and key management events.
//!
//! One JSON object per line, appended to a file.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl AuditEvent {
    fn new(event: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event: event.to_string(),
            identity: None,
            method: None,
            path: None,
            status: None,
            duration_ms: None,
            outcome: None,
            session_id: None,
            target: None,
        }
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    file: Arc<Mutex<File>>,
    path: PathBuf,
}

impl AuditLogger {
    pub async fn new(path: PathBuf) -> Result<Self> {
        ensure_parent_dir(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening audit log file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn log_http(
        &self,
        identity: &str,
        session_id: Option<&str>,
        method: &str,
        path: &str,
        status: u16,
        duration_ms: u128,
    ) {
        let event = AuditEvent {
            identity: Some(identity.to_string()),
            method: Some(method.to_string()),
            path: Some(path.to_string()),
            status: Some(status),
            duration_ms: Some(duration_ms),
            session_id: session_id.map(|s| s.to_string()),
            ..AuditEvent::new("http_request")
        };
        self.write_event(&event).await;
    }

    /// Login attempt. `identity` is the claimed issuer when known.
    pub async fn log_login(&self, identity: Option<&str>, outcome: &str, session_id: Option<&str>) {
        let event = AuditEvent {
            identity: identity.map(|s| s.to_string()),
            outcome: Some(outcome.to_string()),
            session_id: session_id.map(|s| s.to_string()),
            ..AuditEvent::new("login")
        };
        self.write_event(&event).await;
    }

    /// Registry mutation by `actor` on `target`.
    pub async fn log_key_change(&self, actor: &str, action: &str, target: &str, outcome: &str) {
        let event = AuditEvent {
            identity: Some(actor.to_string()),
            outcome: Some(outcome.to_string()),
            target: Some(target.to_string()),
            ..AuditEvent::new(action)
        };
        self.write_event(&event).await;
    }

    async fn write_event(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut file = self.file.lock().await;
            if file.write_all(line.as_bytes()).await.is_ok() {
                let _ = file.write_all(b"\n").await;
                let _ = file.flush().await;
            }
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating audit log directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let logger = AuditLogger::new(path.clone()).await.unwrap();
        assert_eq!(logger.path(), path.as_path());

        logger
            .log_login(Some("alice@example.com"), "success", Some("s-1"))
            .await;
        logger
            .log_key_change("alice@example.com", "key_insert", "bob@example.com", "success")
            .await;
        logger
            .log_http("alice@example.com", Some("s-1"), "GET", "/api/keys", 200, 3)
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "login");
        assert_eq!(events[0]["session_id"], "s-1");
        assert_eq!(events[1]["event"], "key_insert");
        assert_eq!(events[1]["target"], "bob@example.com");
        assert_eq!(events[2]["status"], 200);
        assert!(events[2].get("outcome").is_none());
    }
}
