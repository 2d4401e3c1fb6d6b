use super::time::Timestamp;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EVENT_LOG_RELATIVE_PATH: &str = "logs/stepledger.log";

/// Append-only JSON-lines event log.
///
/// Writes are best-effort: a log failure never fails the operation being
/// logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn under_state_root(state_root: &Path) -> Self {
        Self::new(state_root.join(EVENT_LOG_RELATIVE_PATH))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, event: &str, fields: &[(&str, Value)]) {
        self.append("info", event, fields);
    }

    pub fn warn(&self, event: &str, fields: &[(&str, Value)]) {
        self.append("warn", event, fields);
    }

    pub fn error(&self, event: &str, fields: &[(&str, Value)]) {
        self.append("error", event, fields);
    }

    pub fn append(&self, level: &str, event: &str, fields: &[(&str, Value)]) {
        let _ = self.try_append(level, event, fields);
    }

    fn try_append(
        &self,
        level: &str,
        event: &str,
        fields: &[(&str, Value)],
    ) -> Result<(), std::io::Error> {
        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::String(Timestamp::now().to_iso()),
        );
        payload.insert("level".to_string(), Value::String(level.to_string()));
        payload.insert("event".to_string(), Value::String(event.to_string()));
        for (key, value) in fields {
            payload.insert((*key).to_string(), value.clone());
        }

        let line = serde_json::to_string(&payload)
            .map_err(|source| std::io::Error::other(source.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

/// Reads every parseable line of an event log, skipping torn ones.
pub fn read_event_log(path: &Path) -> Vec<Value> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect()
}
