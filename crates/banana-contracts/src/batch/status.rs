use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Terminal classification of a batch. Every batch ends in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchStatus {
    FullSuccess,
    /// Some workers failed, or every worker failed but matching files were
    /// recovered from disk (`recovered`).
    PartialSuccess { recovered: bool },
    TotalFailure,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullSuccess => "full_success",
            Self::PartialSuccess { .. } => "partial_success",
            Self::TotalFailure => "total_failure",
        }
    }

    pub fn is_usable(self) -> bool {
        !matches!(self, Self::TotalFailure)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Collecting,
    Reconciling,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub phase: BatchPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker_index: usize,
    pub message: String,
}

/// A result that could not be persisted, or a recovered file that could not
/// be read back. Siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFailure {
    pub result_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_workers: usize,
    pub completed_workers: usize,
    pub succeeded_workers: usize,
    /// In completion order for in-memory results, newest-first when recovered.
    pub images: Vec<Vec<u8>>,
    /// Saved paths, or the recovered files when the result set came from disk.
    pub artifacts: Vec<PathBuf>,
    pub failures: Vec<WorkerFailure>,
    pub save_errors: Vec<SaveFailure>,
}

impl BatchOutcome {
    pub fn result_count(&self) -> usize {
        self.images.len()
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self.status, BatchStatus::PartialSuccess { recovered: true })
    }

    /// "3/3", "2/3", "2/2 (recovered)" or "0/2".
    pub fn status_line(&self) -> String {
        match self.status {
            BatchStatus::FullSuccess | BatchStatus::PartialSuccess { recovered: false } => {
                format!("{}/{}", self.succeeded_workers, self.total_workers)
            }
            BatchStatus::PartialSuccess { recovered: true } => {
                format!("{}/{} (recovered)", self.artifacts.len(), self.total_workers)
            }
            BatchStatus::TotalFailure => format!("0/{}", self.total_workers),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{BatchOutcome, BatchStatus};

    fn outcome(status: BatchStatus, succeeded: usize, artifacts: usize) -> BatchOutcome {
        BatchOutcome {
            batch_id: "batch-1".to_string(),
            status,
            total_workers: 3,
            completed_workers: 3,
            succeeded_workers: succeeded,
            images: Vec::new(),
            artifacts: (0..artifacts)
                .map(|idx| PathBuf::from(format!("{idx}.png")))
                .collect(),
            failures: Vec::new(),
            save_errors: Vec::new(),
        }
    }

    #[test]
    fn status_line_distinguishes_outcomes() {
        assert_eq!(outcome(BatchStatus::FullSuccess, 3, 3).status_line(), "3/3");
        assert_eq!(
            outcome(BatchStatus::PartialSuccess { recovered: false }, 2, 2).status_line(),
            "2/3"
        );
        let recovered = outcome(BatchStatus::PartialSuccess { recovered: true }, 0, 2);
        assert!(recovered.is_recovered());
        assert_eq!(recovered.status_line(), "2/3 (recovered)");
        assert_eq!(outcome(BatchStatus::TotalFailure, 0, 0).status_line(), "0/3");
        assert!(!BatchStatus::TotalFailure.is_usable());
    }
}
