mod coordinator;
mod job;
mod persist;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use banana_contracts::artifacts::{
    DateBucket, DirectoryListing, LocalDirectory, SaveLocation, DEFAULT_EXTENSION,
    DEFAULT_PREFIX, DEFAULT_RECONCILE_MAX_AGE,
};
use banana_contracts::batch::{BatchOutcome, BatchPhase, BatchProgress};
use banana_contracts::events::{EventPayload, EventWriter};
use banana_contracts::request::GenerationRequest;
use serde_json::Value;
use tracing::{info, warn};

use self::coordinator::Coordinator;
use self::job::WorkerReport;

/// What one worker delivers: its images, or a failure message.
pub type TaskOutput = std::result::Result<Vec<Vec<u8>>, String>;

/// One unit of generation work. Runs on its own thread.
pub type GenerationTask = Box<dyn FnOnce() -> TaskOutput + Send + 'static>;

pub fn task<F>(f: F) -> GenerationTask
where
    F: FnOnce() -> TaskOutput + Send + 'static,
{
    Box::new(f)
}

/// Builds the task for `worker_index` of a request.
pub trait TaskFactory {
    fn create(&self, request: &GenerationRequest, worker_index: usize) -> GenerationTask;
}

impl<F> TaskFactory for F
where
    F: Fn(&GenerationRequest, usize) -> GenerationTask,
{
    fn create(&self, request: &GenerationRequest, worker_index: usize) -> GenerationTask {
        self(request, worker_index)
    }
}

pub const DEFAULT_MIN_ARTIFACT_BYTES: usize = 100;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Resolved against each request when the batch starts.
    pub save_location: SaveLocation,
    pub prefix: String,
    pub extension: String,
    pub reconcile_max_age: Duration,
    /// Results of this many bytes or fewer are not saved.
    pub min_artifact_bytes: usize,
    pub events_path: Option<PathBuf>,
    /// Fixed bucket instead of today's date at finalize.
    pub date_bucket: Option<DateBucket>,
}

impl BatchConfig {
    /// Saves into `save_dir` whatever the request references.
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self::with_location(SaveLocation::Folder(save_dir.into()))
    }

    pub fn with_location(save_location: SaveLocation) -> Self {
        Self {
            save_location,
            prefix: DEFAULT_PREFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            reconcile_max_age: DEFAULT_RECONCILE_MAX_AGE,
            min_artifact_bytes: DEFAULT_MIN_ARTIFACT_BYTES,
            events_path: None,
            date_bucket: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_reconcile_max_age(mut self, max_age: Duration) -> Self {
        self.reconcile_max_age = max_age;
        self
    }

    pub fn with_min_artifact_bytes(mut self, min_bytes: usize) -> Self {
        self.min_artifact_bytes = min_bytes;
        self
    }

    pub fn with_events_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.events_path = Some(path.into());
        self
    }

    pub fn with_date_bucket(mut self, bucket: DateBucket) -> Self {
        self.date_bucket = Some(bucket);
        self
    }
}

/// Launches batches: one thread per worker, all started at once, with every
/// completion funnelled through a single coordinator thread per batch.
pub struct BatchOrchestrator {
    config: BatchConfig,
    listing: Arc<dyn DirectoryListing>,
    events: EventWriter,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig) -> Self {
        Self::with_listing(config, Arc::new(LocalDirectory))
    }

    pub fn with_listing(config: BatchConfig, listing: Arc<dyn DirectoryListing>) -> Self {
        let events = match config.events_path.as_ref() {
            Some(path) => EventWriter::new(path, ""),
            None => EventWriter::disabled(""),
        };
        Self {
            config,
            listing,
            events,
        }
    }

    pub fn start<F>(&self, request: &GenerationRequest, factory: &F) -> Result<BatchJobHandle>
    where
        F: TaskFactory + ?Sized,
    {
        let batch_id = uuid::Uuid::new_v4().simple().to_string();
        let total_workers = request.worker_count();
        let events = self.events.for_batch(&batch_id);
        let save_dir = self.config.save_location.for_request(request);

        let mut payload = EventPayload::new();
        payload.insert("total_workers".to_string(), Value::from(total_workers));
        payload.insert(
            "save_dir".to_string(),
            Value::from(save_dir.to_string_lossy().to_string()),
        );
        payload.insert("mode".to_string(), Value::from(request.mode().as_str()));
        payload.insert(
            "aspect_ratio".to_string(),
            Value::from(request.aspect_ratio().as_str()),
        );
        payload.insert(
            "image_count".to_string(),
            Value::from(request.image_refs().len()),
        );
        if let Err(err) = events.emit("batch_started", payload) {
            warn!(batch_id = %batch_id, error = %err, "failed to append batch_started event");
        }
        info!(
            batch_id = %batch_id,
            total_workers,
            mode = %request.mode(),
            save_dir = %save_dir.display(),
            "batch started"
        );

        let progress = Arc::new(Mutex::new(BatchProgress {
            completed: 0,
            total: total_workers,
            phase: BatchPhase::Collecting,
        }));
        let (report_tx, report_rx) = mpsc::channel::<WorkerReport>();
        let (outcome_tx, outcome_rx) = mpsc::channel::<BatchOutcome>();

        let coordinator = Coordinator::new(
            batch_id.clone(),
            total_workers,
            save_dir,
            &self.config,
            Arc::clone(&self.listing),
            events,
            Arc::clone(&progress),
            outcome_tx,
        );
        let short_id: String = batch_id.chars().take(8).collect();
        let coordinator_handle = thread::Builder::new()
            .name(format!("banana-batch-{short_id}"))
            .spawn(move || coordinator.run(report_rx))
            .context("coordinator thread spawn failed")?;

        for worker_index in 0..total_workers {
            let work = factory.create(request, worker_index);
            let sender = CompletionSender::new(worker_index, report_tx.clone());
            let spawned = thread::Builder::new()
                .name(format!("banana-worker-{worker_index}"))
                .spawn(move || run_worker(work, sender));
            if let Err(err) = spawned {
                // Dropping the closure dropped its sender, which reports the
                // worker as failed.
                warn!(batch_id = %batch_id, worker_index, error = %err, "worker thread spawn failed");
            }
        }
        drop(report_tx);

        Ok(BatchJobHandle {
            batch_id,
            progress,
            outcome: outcome_rx,
            coordinator: Some(coordinator_handle),
        })
    }
}

/// One-shot completion channel handed to a worker.
///
/// Delivering consumes it. If it is dropped undelivered the worker is reported
/// as failed, so every worker is counted exactly once.
struct CompletionSender {
    worker_index: usize,
    tx: Option<Sender<WorkerReport>>,
}

impl CompletionSender {
    fn new(worker_index: usize, tx: Sender<WorkerReport>) -> Self {
        Self {
            worker_index,
            tx: Some(tx),
        }
    }

    fn deliver(mut self, output: TaskOutput) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerReport::from_output(self.worker_index, output));
        }
    }
}

impl Drop for CompletionSender {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WorkerReport::Failed {
                worker_index: self.worker_index,
                message: "worker exited without reporting".to_string(),
            });
        }
    }
}

fn run_worker(work: GenerationTask, sender: CompletionSender) {
    let output = match panic::catch_unwind(AssertUnwindSafe(move || work())) {
        Ok(output) => output,
        Err(payload) => Err(format!("worker panicked: {}", panic_message(payload.as_ref()))),
    };
    sender.deliver(output);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

/// Caller's view of a running batch.
pub struct BatchJobHandle {
    batch_id: String,
    progress: Arc<Mutex<BatchProgress>>,
    outcome: Receiver<BatchOutcome>,
    coordinator: Option<JoinHandle<()>>,
}

impl BatchJobHandle {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn progress(&self) -> BatchProgress {
        match self.progress.lock() {
            Ok(progress) => *progress,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Blocks until the batch finalizes. A worker that never reports keeps
    /// this blocked forever.
    pub fn wait(mut self) -> Result<BatchOutcome> {
        let outcome = self
            .outcome
            .recv()
            .map_err(|_| anyhow!("batch {} ended without an outcome", self.batch_id))?;
        if let Some(handle) = self.coordinator.take() {
            if handle.join().is_err() {
                warn!(batch_id = %self.batch_id, "coordinator thread panicked after finalize");
            }
        }
        Ok(outcome)
    }

    /// Bounded wait. `None` means the batch is still collecting; nothing is
    /// cancelled. The outcome is handed out once.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<BatchOutcome> {
        self.outcome.recv_timeout(timeout).ok()
    }
}
