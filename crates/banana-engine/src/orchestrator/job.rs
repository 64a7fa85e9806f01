use banana_contracts::batch::{BatchPhase, BatchProgress, WorkerFailure};

/// One-way completion message from a worker task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerReport {
    Succeeded {
        worker_index: usize,
        images: Vec<Vec<u8>>,
    },
    Failed {
        worker_index: usize,
        message: String,
    },
}

impl WorkerReport {
    pub(crate) fn from_output(worker_index: usize, output: super::TaskOutput) -> Self {
        match output {
            Ok(images) => Self::Succeeded {
                worker_index,
                images,
            },
            Err(message) => Self::Failed {
                worker_index,
                message,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Counted; more workers still outstanding.
    Collecting,
    /// Counted, and this was the last one. Finalize now.
    Finalize,
    /// Arrived after finalize; dropped.
    Ignored,
}

/// Aggregate state of one batch: COLLECTING until every worker has reported,
/// then RECONCILING while the outcome is decided, then DONE.
#[derive(Debug)]
pub(crate) struct BatchJob {
    total_workers: usize,
    completed_workers: usize,
    succeeded_workers: usize,
    accumulated_results: Vec<Vec<u8>>,
    failures: Vec<WorkerFailure>,
    phase: BatchPhase,
}

impl BatchJob {
    pub(crate) fn new(total_workers: usize) -> Self {
        Self {
            total_workers,
            completed_workers: 0,
            succeeded_workers: 0,
            accumulated_results: Vec::new(),
            failures: Vec::new(),
            phase: BatchPhase::Collecting,
        }
    }

    pub(crate) fn record(&mut self, report: WorkerReport) -> Delivery {
        if self.phase != BatchPhase::Collecting {
            return Delivery::Ignored;
        }

        match report {
            WorkerReport::Succeeded { images, .. } => {
                self.succeeded_workers += 1;
                self.accumulated_results.extend(images);
            }
            WorkerReport::Failed {
                worker_index,
                message,
            } => {
                self.failures.push(WorkerFailure {
                    worker_index,
                    message,
                });
            }
        }
        self.completed_workers += 1;

        if self.completed_workers >= self.total_workers {
            self.phase = BatchPhase::Reconciling;
            Delivery::Finalize
        } else {
            Delivery::Collecting
        }
    }

    pub(crate) fn mark_done(&mut self) {
        self.phase = BatchPhase::Done;
    }

    pub(crate) fn progress(&self) -> BatchProgress {
        BatchProgress {
            completed: self.completed_workers,
            total: self.total_workers,
            phase: self.phase,
        }
    }

    pub(crate) fn total_workers(&self) -> usize {
        self.total_workers
    }

    pub(crate) fn completed_workers(&self) -> usize {
        self.completed_workers
    }

    pub(crate) fn succeeded_workers(&self) -> usize {
        self.succeeded_workers
    }

    pub(crate) fn all_succeeded(&self) -> bool {
        self.succeeded_workers == self.total_workers
    }

    #[cfg(test)]
    pub(crate) fn results(&self) -> &[Vec<u8>] {
        &self.accumulated_results
    }

    pub(crate) fn take_results(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.accumulated_results)
    }

    pub(crate) fn take_failures(&mut self) -> Vec<WorkerFailure> {
        let mut failures = std::mem::take(&mut self.failures);
        failures.sort_by_key(|failure| failure.worker_index);
        failures
    }
}
