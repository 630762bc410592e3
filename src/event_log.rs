use std::{fmt, sync::Arc};

use rearch::CapsuleHandle;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::kv::{self, KeyValueStore, key_value_store_capsule};

/// Key of the blob holding the event log.
pub const LOGS_KEY: &str = "logs";

pub fn event_log_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn EventLog> {
    let kv = Arc::clone(get.as_ref(key_value_store_capsule));
    Arc::new(KvEventLog::new(kv))
}

/// The `type` of a log entry.
///
/// Entries written by other tools may carry any string here; those decode as
/// [`EventKind::Other`] and are written back unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Info,
    Error,
    Action,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Error => "error",
            Self::Action => "action",
            Self::Other(kind) => kind,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Freshly appended entries use a UUID v4; older entries may use any string.
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Append-only record of what the user did, kept apart from the mapping table.
pub trait EventLog: Send + Sync {
    fn log_event(
        &self,
        kind: EventKind,
        message: &str,
        details: serde_json::Value,
    ) -> anyhow::Result<LogEntry>;

    /// All entries, oldest first.
    fn get_logs(&self) -> anyhow::Result<Vec<LogEntry>>;
}

#[cfg(test)]
mockall::mock! {
    pub EventLog {}

    impl EventLog for EventLog {
        fn log_event(
            &self,
            kind: EventKind,
            message: &str,
            details: serde_json::Value,
        ) -> anyhow::Result<LogEntry>;
        fn get_logs(&self) -> anyhow::Result<Vec<LogEntry>>;
    }
}

pub struct KvEventLog {
    kv: Arc<dyn KeyValueStore>,
}

impl KvEventLog {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

impl EventLog for KvEventLog {
    fn log_event(
        &self,
        kind: EventKind,
        message: &str,
        details: serde_json::Value,
    ) -> anyhow::Result<LogEntry> {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: OffsetDateTime::now_utc(),
            kind,
            message: message.to_owned(),
            details,
        };
        debug!(kind = %entry.kind, event_message = message, details = %entry.details, "Appending event");

        let mut logs: Vec<LogEntry> = kv::load_json(self.kv.as_ref(), LOGS_KEY)?;
        logs.push(entry.clone());
        kv::store_json(self.kv.as_ref(), LOGS_KEY, &logs)?;
        Ok(entry)
    }

    fn get_logs(&self) -> anyhow::Result<Vec<LogEntry>> {
        kv::load_json(self.kv.as_ref(), LOGS_KEY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::kv::MemoryKeyValueStore;

    fn new_log() -> (Arc<MemoryKeyValueStore>, KvEventLog) {
        let kv = Arc::new(MemoryKeyValueStore::default());
        let log = KvEventLog::new(Arc::clone(&kv) as Arc<dyn KeyValueStore>);
        (kv, log)
    }

    #[test]
    fn test_empty_log() {
        let (_, log) = new_log();
        assert!(log.get_logs().unwrap().is_empty());
    }

    #[test]
    fn test_entries_come_back_in_append_order() {
        let (_, log) = new_log();
        let first = log
            .log_event(EventKind::Info, "Shortened URL created", json!({ "code": "abc123" }))
            .unwrap();
        let second = log
            .log_event(EventKind::Error, "Invalid URL provided", json!({ "row": 2 }))
            .unwrap();
        let third = log.log_event(EventKind::Action, "Removed", json!({})).unwrap();

        let logs = log.get_logs().unwrap();
        assert_eq!(logs, vec![first.clone(), second.clone(), third]);
        assert_ne!(first.id, second.id);
        assert!(first.timestamp <= second.timestamp);
        assert_eq!(logs[1].details["row"], 2);
    }

    #[test]
    fn test_persisted_shape() {
        let (kv, log) = new_log();
        log.log_event(EventKind::Action, "Link removed", json!({ "code": "abc123" }))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&kv.get_item(LOGS_KEY).unwrap().unwrap()).unwrap();
        let entry = &raw[0];
        assert_eq!(entry["type"], "action");
        assert_eq!(entry["message"], "Link removed");
        assert_eq!(entry["details"], json!({ "code": "abc123" }));
        assert!(entry["id"].is_string());
        assert!(entry["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_foreign_entries_survive_append() {
        let (kv, log) = new_log();
        kv.set_item(
            LOGS_KEY,
            r#"[{
                "id": "1740830400000-k3j9x2",
                "timestamp": "2025-03-01T12:00:00.000Z",
                "type": "warning",
                "message": "Storage nearly full",
                "details": { "used": 97 }
            }]"#,
        )
        .unwrap();

        let appended = log.log_event(EventKind::Info, "Stats refreshed", json!({})).unwrap();

        let logs = log.get_logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, "1740830400000-k3j9x2");
        assert_eq!(logs[0].kind, EventKind::Other("warning".to_owned()));
        assert_eq!(logs[0].kind.to_string(), "warning");
        assert_eq!(logs[0].details["used"], 97);
        assert_eq!(logs[1], appended);

        let raw: serde_json::Value =
            serde_json::from_str(&kv.get_item(LOGS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw[0]["type"], "warning");
        assert_eq!(raw[0]["id"], "1740830400000-k3j9x2");
        assert_eq!(raw[1]["type"], "info");
    }

    #[test]
    fn test_corrupt_log_restarts_empty() {
        let (kv, log) = new_log();
        kv.set_item(LOGS_KEY, r#"[{"type": "debug"}]"#).unwrap();
        assert!(log.get_logs().unwrap().is_empty());

        log.log_event(EventKind::Info, "Stats refreshed", json!({})).unwrap();
        assert_eq!(log.get_logs().unwrap().len(), 1);
    }
}
