mod hints;
mod status;
mod summary;

pub use hints::failure_hint;
pub use status::{
    BatchOutcome, BatchPhase, BatchProgress, BatchStatus, SaveFailure, WorkerFailure,
};
pub use summary::{write_summary, BatchSummary};
