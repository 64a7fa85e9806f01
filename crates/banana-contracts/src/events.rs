use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for batch lifecycle events (`events.jsonl`).
///
/// - default fields are `type`, `batch_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// Writers derived with [`EventWriter::for_batch`] share the file lock, so
/// concurrent batches can append to the same file.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Option<Arc<EventSink>>,
    batch_id: String,
}

#[derive(Debug)]
struct EventSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, batch_id: impl Into<String>) -> Self {
        Self {
            sink: Some(Arc::new(EventSink {
                path: path.into(),
                lock: Mutex::new(()),
            })),
            batch_id: batch_id.into(),
        }
    }

    /// Writer that accepts events and drops them.
    pub fn disabled(batch_id: impl Into<String>) -> Self {
        Self {
            sink: None,
            batch_id: batch_id.into(),
        }
    }

    pub fn for_batch(&self, batch_id: impl Into<String>) -> Self {
        Self {
            sink: self.sink.clone(),
            batch_id: batch_id.into(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|sink| sink.path.as_path())
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "batch_id".to_string(),
            Value::String(self.batch_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(sink) = self.sink.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = sink.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = sink
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sink.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "batch-123");

        let mut payload = EventPayload::new();
        payload.insert("total_workers".to_string(), Value::from(3));
        let emitted = writer.emit("batch_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("batch_started".to_string()));
        assert_eq!(parsed["batch_id"], Value::String("batch-123".to_string()));
        assert_eq!(parsed["total_workers"], Value::from(3));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "batch-123");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("batch_started", payload)?;

        assert_eq!(emitted["type"], Value::String("override".to_string()));
        Ok(())
    }

    #[test]
    fn derived_writers_share_the_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let root = EventWriter::new(&path, "root");
        let first = root.for_batch("batch-a");
        let second = root.for_batch("batch-b");

        first.emit("one", EventPayload::new())?;
        second.emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["batch_id"], Value::String("batch-a".to_string()));
        assert_eq!(rows[1]["batch_id"], Value::String("batch-b".to_string()));
        Ok(())
    }

    #[test]
    fn disabled_writer_touches_nothing() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("batch-x");
        let emitted = writer.emit("batch_started", EventPayload::new())?;
        assert!(writer.path().is_none());
        assert_eq!(emitted["batch_id"], Value::String("batch-x".to_string()));
        Ok(())
    }
}
