use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use banana_contracts::artifacts::{
    ArtifactPattern, DateBucket, DirectoryListing, ResultReconciler, SequentialNamer,
};
use banana_contracts::batch::{failure_hint, BatchOutcome, BatchProgress, BatchStatus, SaveFailure};
use banana_contracts::events::{EventPayload, EventWriter};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::job::{BatchJob, Delivery, WorkerReport};
use super::persist::save_results;
use super::BatchConfig;

type SharedListing = Arc<dyn DirectoryListing>;

/// The single serialization point of a batch. Owns the [`BatchJob`]; workers
/// only ever send it one-way [`WorkerReport`]s.
pub(crate) struct Coordinator {
    batch_id: String,
    job: BatchJob,
    save_dir: PathBuf,
    prefix: String,
    extension: String,
    date_bucket: Option<DateBucket>,
    reconcile_max_age: Duration,
    min_artifact_bytes: usize,
    namer: SequentialNamer<SharedListing>,
    reconciler: ResultReconciler<SharedListing>,
    events: EventWriter,
    progress: Arc<Mutex<BatchProgress>>,
    outcome_tx: Option<Sender<BatchOutcome>>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        batch_id: String,
        total_workers: usize,
        save_dir: PathBuf,
        config: &BatchConfig,
        listing: SharedListing,
        events: EventWriter,
        progress: Arc<Mutex<BatchProgress>>,
        outcome_tx: Sender<BatchOutcome>,
    ) -> Self {
        Self {
            batch_id,
            job: BatchJob::new(total_workers),
            save_dir,
            prefix: config.prefix.clone(),
            extension: config.extension.clone(),
            date_bucket: config.date_bucket.clone(),
            reconcile_max_age: config.reconcile_max_age,
            min_artifact_bytes: config.min_artifact_bytes,
            namer: SequentialNamer::new(Arc::clone(&listing)),
            reconciler: ResultReconciler::new(listing),
            events,
            progress,
            outcome_tx: Some(outcome_tx),
        }
    }

    /// Drains reports until every sender is gone. Finalize runs inside this
    /// loop, once, on the report that completes the count.
    pub(crate) fn run(mut self, reports: Receiver<WorkerReport>) {
        for report in reports {
            let (event_type, mut payload) = worker_event(&report);
            let worker_index = report_worker_index(&report);

            let delivery = self.job.record(report);
            if delivery == Delivery::Ignored {
                debug!(
                    batch_id = %self.batch_id,
                    worker_index,
                    "ignoring report after finalize"
                );
                continue;
            }

            self.publish_progress();
            payload.insert(
                "completed_workers".to_string(),
                Value::from(self.job.completed_workers()),
            );
            payload.insert(
                "total_workers".to_string(),
                Value::from(self.job.total_workers()),
            );
            self.emit(event_type, payload);

            if delivery == Delivery::Finalize {
                let outcome = self.finalize();
                if let Some(tx) = self.outcome_tx.take() {
                    if tx.send(outcome).is_err() {
                        debug!(batch_id = %self.batch_id, "batch handle dropped before finalize");
                    }
                }
            }
        }
    }

    fn finalize(&mut self) -> BatchOutcome {
        let bucket = self.date_bucket.clone().unwrap_or_else(DateBucket::today);
        let pattern = ArtifactPattern::new(&self.prefix, bucket, &self.extension);
        let all_succeeded = self.job.all_succeeded();
        let results = self.job.take_results();
        let failures = self.job.take_failures();

        let (status, images, artifacts, save_errors) = if !results.is_empty() {
            let status = if all_succeeded {
                BatchStatus::FullSuccess
            } else {
                BatchStatus::PartialSuccess { recovered: false }
            };
            let (artifacts, save_errors) = self.persist(&pattern, &results);
            (status, results, artifacts, save_errors)
        } else {
            let (images, artifacts, read_errors) = self.recover(&pattern);
            let status = if artifacts.is_empty() {
                BatchStatus::TotalFailure
            } else {
                BatchStatus::PartialSuccess { recovered: true }
            };
            (status, images, artifacts, read_errors)
        };

        self.job.mark_done();
        self.publish_progress();

        let outcome = BatchOutcome {
            batch_id: self.batch_id.clone(),
            status,
            total_workers: self.job.total_workers(),
            completed_workers: self.job.completed_workers(),
            succeeded_workers: self.job.succeeded_workers(),
            images,
            artifacts,
            failures,
            save_errors,
        };

        let mut payload = EventPayload::new();
        payload.insert("status".to_string(), Value::from(outcome.status.as_str()));
        payload.insert("status_line".to_string(), Value::from(outcome.status_line()));
        payload.insert("result_count".to_string(), Value::from(outcome.result_count()));
        payload.insert(
            "artifacts".to_string(),
            Value::Array(
                outcome
                    .artifacts
                    .iter()
                    .map(|path| Value::from(path.to_string_lossy().to_string()))
                    .collect(),
            ),
        );
        self.emit("batch_finalized", payload);
        info!(
            batch_id = %self.batch_id,
            status = %outcome.status,
            status_line = %outcome.status_line(),
            "batch finalized"
        );
        outcome
    }

    fn persist(
        &self,
        pattern: &ArtifactPattern,
        results: &[Vec<u8>],
    ) -> (Vec<PathBuf>, Vec<SaveFailure>) {
        let report = save_results(
            &self.namer,
            &self.save_dir,
            pattern,
            results,
            self.min_artifact_bytes,
        );

        for (result_index, path) in &report.saved {
            let mut payload = EventPayload::new();
            payload.insert("result_index".to_string(), Value::from(*result_index));
            payload.insert(
                "path".to_string(),
                Value::from(path.to_string_lossy().to_string()),
            );
            self.emit("artifact_saved", payload);
            info!(batch_id = %self.batch_id, path = %path.display(), "artifact saved");
        }
        for failure in &report.errors {
            let mut payload = EventPayload::new();
            payload.insert(
                "result_index".to_string(),
                Value::from(failure.result_index),
            );
            payload.insert("error".to_string(), Value::from(failure.message.clone()));
            self.emit("artifact_save_failed", payload);
            warn!(
                batch_id = %self.batch_id,
                result_index = failure.result_index,
                error = %failure.message,
                "artifact not saved"
            );
        }

        let artifacts = report.saved.into_iter().map(|(_, path)| path).collect();
        (artifacts, report.errors)
    }

    /// No in-memory results: look for recent matching files instead.
    ///
    /// Every scanned file counts as recovered. One that can no longer be read
    /// contributes no bytes and is reported as a [`SaveFailure`].
    fn recover(
        &self,
        pattern: &ArtifactPattern,
    ) -> (Vec<Vec<u8>>, Vec<PathBuf>, Vec<SaveFailure>) {
        let mut payload = EventPayload::new();
        payload.insert(
            "directory".to_string(),
            Value::from(self.save_dir.to_string_lossy().to_string()),
        );
        payload.insert("pattern".to_string(), Value::from(pattern.glob()));
        self.emit("batch_reconciling", payload);

        let found = match self.reconciler.scan(
            &self.save_dir,
            pattern,
            self.reconcile_max_age,
            self.job.total_workers(),
        ) {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    batch_id = %self.batch_id,
                    directory = %self.save_dir.display(),
                    error = %err,
                    "reconciliation scan failed"
                );
                Vec::new()
            }
        };

        let mut images = Vec::new();
        let mut artifacts = Vec::new();
        let mut read_errors = Vec::new();
        for (result_index, artifact) in found.into_iter().enumerate() {
            let mut payload = EventPayload::new();
            payload.insert(
                "path".to_string(),
                Value::from(artifact.path.to_string_lossy().to_string()),
            );
            if let Some(sequence) = artifact.sequence_number {
                payload.insert("sequence_number".to_string(), Value::from(sequence));
            }
            match std::fs::read(&artifact.path) {
                Ok(bytes) => {
                    payload.insert("readable".to_string(), Value::from(true));
                    images.push(bytes);
                }
                Err(err) => {
                    warn!(
                        batch_id = %self.batch_id,
                        path = %artifact.path.display(),
                        error = %err,
                        "recovered artifact unreadable"
                    );
                    payload.insert("readable".to_string(), Value::from(false));
                    read_errors.push(SaveFailure {
                        result_index,
                        message: format!(
                            "recovered file {} unreadable: {err}",
                            artifact.path.display()
                        ),
                    });
                }
            }
            self.emit("artifact_recovered", payload);
            artifacts.push(artifact.path);
        }
        (images, artifacts, read_errors)
    }

    fn publish_progress(&self) {
        let snapshot = self.job.progress();
        match self.progress.lock() {
            Ok(mut progress) => *progress = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!(
                batch_id = %self.batch_id,
                event_type,
                error = %err,
                "failed to append event"
            );
        }
    }
}

fn report_worker_index(report: &WorkerReport) -> usize {
    match report {
        WorkerReport::Succeeded { worker_index, .. } | WorkerReport::Failed { worker_index, .. } => {
            *worker_index
        }
    }
}

fn worker_event(report: &WorkerReport) -> (&'static str, EventPayload) {
    let mut payload = EventPayload::new();
    match report {
        WorkerReport::Succeeded {
            worker_index,
            images,
        } => {
            payload.insert("worker_index".to_string(), Value::from(*worker_index));
            payload.insert("image_count".to_string(), Value::from(images.len()));
            ("worker_succeeded", payload)
        }
        WorkerReport::Failed {
            worker_index,
            message,
        } => {
            payload.insert("worker_index".to_string(), Value::from(*worker_index));
            payload.insert("error".to_string(), Value::from(message.clone()));
            if let Some(hint) = failure_hint(message) {
                payload.insert("hint".to_string(), Value::from(hint));
            }
            ("worker_failed", payload)
        }
    }
}
