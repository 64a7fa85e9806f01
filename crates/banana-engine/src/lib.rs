//! Batch generation engine: runs one request on up to four parallel workers,
//! funnels their completions through a single coordinator, saves the results
//! and falls back to recovering them from disk.

pub mod inputs;
pub mod orchestrator;
pub mod providers;
pub mod tasks;

pub use orchestrator::{
    task, BatchConfig, BatchJobHandle, BatchOrchestrator, GenerationTask, TaskFactory, TaskOutput,
};
pub use providers::{default_provider_registry, ImageProvider, ProviderRegistry};
pub use tasks::ProviderTaskFactory;
