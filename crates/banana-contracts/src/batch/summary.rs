use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::status::{BatchOutcome, SaveFailure, WorkerFailure};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub status_line: String,
    pub total_workers: usize,
    pub completed_workers: usize,
    pub succeeded_workers: usize,
    pub result_count: usize,
    pub recovered: bool,
    pub artifacts: Vec<String>,
    pub failures: Vec<WorkerFailure>,
    pub save_errors: Vec<SaveFailure>,
}

impl BatchSummary {
    pub fn from_outcome(outcome: &BatchOutcome, started_at: String, finished_at: String) -> Self {
        Self {
            batch_id: outcome.batch_id.clone(),
            started_at,
            finished_at,
            status: outcome.status.as_str().to_string(),
            status_line: outcome.status_line(),
            total_workers: outcome.total_workers,
            completed_workers: outcome.completed_workers,
            succeeded_workers: outcome.succeeded_workers,
            result_count: outcome.result_count(),
            recovered: outcome.is_recovered(),
            artifacts: outcome
                .artifacts
                .iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect(),
            failures: outcome.failures.clone(),
            save_errors: outcome.save_errors.clone(),
        }
    }
}

pub fn write_summary(
    path: &Path,
    summary: &BatchSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Map, Value};

    use super::{write_summary, BatchSummary};
    use crate::batch::{BatchOutcome, BatchStatus, WorkerFailure};

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("summary.json");

        let outcome = BatchOutcome {
            batch_id: "batch-123".to_string(),
            status: BatchStatus::PartialSuccess { recovered: false },
            total_workers: 3,
            completed_workers: 3,
            succeeded_workers: 2,
            images: vec![vec![1; 200], vec![2; 200]],
            artifacts: vec![
                PathBuf::from("banana_1sep_001.png"),
                PathBuf::from("banana_1sep_002.png"),
            ],
            failures: vec![WorkerFailure {
                worker_index: 1,
                message: "blocked".to_string(),
            }],
            save_errors: Vec::new(),
        };
        let summary = BatchSummary::from_outcome(
            &outcome,
            "2025-09-01T00:00:00+00:00".to_string(),
            "2025-09-01T00:00:05+00:00".to_string(),
        );
        let mut extra = Map::new();
        extra.insert("provider".to_string(), json!("dryrun"));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["batch_id"], json!("batch-123"));
        assert_eq!(parsed["status"], json!("partial_success"));
        assert_eq!(parsed["status_line"], json!("2/3"));
        assert_eq!(parsed["result_count"], json!(2));
        assert_eq!(parsed["failures"][0]["message"], json!("blocked"));
        assert_eq!(parsed["artifacts"][1], json!("banana_1sep_002.png"));
        assert_eq!(parsed["provider"], json!("dryrun"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
